use crate::error::{ParleyError, Result};
use crate::model::Username;

pub const USER_ENV: &str = "PARLEY_USER";

/// Resolve the local participant's name.
///
/// An explicit name wins; otherwise `PARLEY_USER` is consulted. Empty values
/// count as unset.
pub fn resolve_user(explicit: Option<&str>) -> Result<Username> {
    let raw = explicit
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(USER_ENV).ok().filter(|s| !s.trim().is_empty()))
        .ok_or(ParleyError::MissingUsername)?;
    Username::parse(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-var tests must not run concurrently.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn explicit_name_wins_over_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var(USER_ENV, "from-env") };
        assert_eq!(resolve_user(Some("alice")).unwrap().as_str(), "alice");
        unsafe { std::env::remove_var(USER_ENV) };
    }

    #[test]
    fn resolve_user_env_behavior() {
        let _guard = ENV_LOCK.lock().unwrap();

        unsafe { std::env::set_var(USER_ENV, "bob") };
        assert_eq!(resolve_user(None).unwrap().as_str(), "bob");

        // Ignores empty value
        unsafe { std::env::set_var(USER_ENV, "  ") };
        assert!(matches!(resolve_user(None), Err(ParleyError::MissingUsername)));

        unsafe { std::env::remove_var(USER_ENV) };
        assert!(matches!(resolve_user(Some("")), Err(ParleyError::MissingUsername)));

        // Present but invalid
        assert!(matches!(
            resolve_user(Some("two words")),
            Err(ParleyError::InvalidUsername(_))
        ));
    }
}
