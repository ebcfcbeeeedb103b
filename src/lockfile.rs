use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::FunctestError;

/// Zero-length marker `<base>/run-<provider>.lock`. Its presence means the
/// named cluster is owned by some controller, possibly in another process.
#[derive(Debug, Clone)]
pub struct LockFile {
    provider: String,
    path: PathBuf,
}

impl LockFile {
    pub fn new(base_dir: &Path, provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            path: base_dir.join(format!("run-{provider}.lock")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the marker atomically; fails if it is already there.
    pub fn acquire(&self) -> Result<(), FunctestError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "lock file created");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(self.already_running()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn release(&self) -> Result<(), FunctestError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "lock file removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(self.not_running()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn ensure_held(&self) -> Result<(), FunctestError> {
        if self.exists() {
            Ok(())
        } else {
            Err(self.not_running())
        }
    }

    pub fn already_running(&self) -> FunctestError {
        FunctestError::AlreadyRunning {
            provider: self.provider.clone(),
            lock_path: self.path.clone(),
        }
    }

    pub fn not_running(&self) -> FunctestError {
        FunctestError::NotRunning {
            provider: self.provider.clone(),
            lock_path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lock_path_is_keyed_by_provider() {
        let lock = LockFile::new(Path::new("/srv/functest"), "k8s-1.17");
        assert_eq!(lock.path(), Path::new("/srv/functest/run-k8s-1.17.lock"));
    }

    #[test]
    fn second_acquire_fails_until_released() {
        let dir = tempdir().unwrap();
        let lock = LockFile::new(dir.path(), "k8s-1.17");
        lock.acquire().expect("first acquire");
        assert!(lock.exists());
        assert_eq!(fs::metadata(lock.path()).unwrap().len(), 0);

        let other = LockFile::new(dir.path(), "k8s-1.17");
        assert!(matches!(
            other.acquire(),
            Err(FunctestError::AlreadyRunning { .. })
        ));

        lock.release().expect("release");
        assert!(!lock.exists());
        other.acquire().expect("acquire after release");
    }

    #[test]
    fn release_without_lock_is_not_running() {
        let dir = tempdir().unwrap();
        let lock = LockFile::new(dir.path(), "os-3.11");
        assert!(matches!(lock.release(), Err(FunctestError::NotRunning { .. })));
        assert!(matches!(lock.ensure_held(), Err(FunctestError::NotRunning { .. })));
    }
}
