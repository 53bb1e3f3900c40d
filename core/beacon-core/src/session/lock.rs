//! Cross-process write lock for the session store.
//!
//! The store file is replaced by rename on every write, so it cannot carry
//! the lock itself. A sidecar `<store>.lock` file is flock'ed instead; the
//! lock is released when the guard drops (or the process exits).

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{BeaconError, Result};

pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}

#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Blocks until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| BeaconError::Lock {
                path: path.to_path_buf(),
                source,
            })?;

        FileExt::lock_exclusive(&file).map_err(|source| BeaconError::Lock {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(StoreLock {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to release store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_path_is_sidecar() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/x/sessions.json")),
            PathBuf::from("/tmp/x/sessions.json.lock")
        );
    }

    #[test]
    fn test_lock_is_reacquirable_after_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sessions.json.lock");
        {
            let _guard = StoreLock::acquire(&path).unwrap();
            let other = OpenOptions::new().write(true).open(&path).unwrap();
            assert!(FileExt::try_lock_exclusive(&other).is_err());
        }
        let _again = StoreLock::acquire(&path).unwrap();
    }
}
