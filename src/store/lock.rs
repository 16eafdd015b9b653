use fs2::FileExt;
use std::fs::File;

/// Advisory exclusive lock held on an open append handle for the duration of
/// one write. Released when dropped.
///
/// Locking is best effort: network shares and some filesystems refuse
/// advisory locks, in which case the guard is inert and the write relies on
/// the atomicity of a single append.
pub struct AppendGuard<'a> {
    file: Option<&'a File>,
}

impl AppendGuard<'_> {
    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }
}

pub fn lock_for_append(file: &File) -> AppendGuard<'_> {
    match file.lock_exclusive() {
        Ok(()) => AppendGuard { file: Some(file) },
        Err(err) => {
            tracing::debug!(error = %err, "advisory lock unavailable; appending unlocked");
            AppendGuard { file: None }
        }
    }
}

impl Drop for AppendGuard<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file {
            let _ = FileExt::unlock(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn guard_locks_and_releases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.log");
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let other = OpenOptions::new().append(true).open(&path).unwrap();

        {
            let guard = lock_for_append(&writer);
            assert!(guard.is_locked());
            // A second handle cannot take the lock while the guard lives
            assert!(other.try_lock_exclusive().is_err());
        }
        other.try_lock_exclusive().unwrap();
        FileExt::unlock(&other).unwrap();
    }
}
