use std::sync::OnceLock;

/// Build-time git commit SHA stamped by build.rs when available.
pub fn git_sha() -> Option<&'static str> {
    option_env!("PARLEY_BUILD_GIT_SHA")
}

/// Version string shown by `parley --version`.
pub fn long_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| match git_sha() {
        Some(sha) => format!(
            "{} ({})",
            env!("CARGO_PKG_VERSION"),
            sha.get(..12).unwrap_or(sha)
        ),
        None => env!("CARGO_PKG_VERSION").to_string(),
    })
}
