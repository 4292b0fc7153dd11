//! Single-process guard for on-disk stores
//!
//! Opening a store at `<path>` takes an advisory exclusive lock on
//! `<path>.lock` and writes [`LockMetadata`] into it. The OS releases the lock
//! when the holder exits, so an orphaned lock file never blocks a later open.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{LixError, Result};

/// Written into the lock file for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockMetadata {
    /// Process ID of the lock holder
    pub pid: u32,

    /// When the lock was acquired
    pub started_at: DateTime<Utc>,
}

impl LockMetadata {
    /// Metadata for the current process
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for LockMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PID {} since {}", self.pid, self.started_at.to_rfc3339())
    }
}

/// A held store lock, released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock guarding `store_path`.
    ///
    /// # Errors
    ///
    /// Returns [`LixError::StoreLocked`] when another process holds the store.
    pub fn acquire(store_path: &Path) -> Result<Self> {
        let path = lock_path_for(store_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_metadata(&mut file)
                .map(|meta| meta.to_string())
                .unwrap_or_else(|| "unknown holder".to_string());
            return Err(LixError::StoreLocked(format!(
                "{} ({})",
                store_path.display(),
                holder
            )));
        }

        let json = serde_json::to_string_pretty(&LockMetadata::current())?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        tracing::debug!(lock = %path.display(), "Acquired store lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_metadata(file: &mut File) -> Option<LockMetadata> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}

/// `<store>.lock` next to the store file
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/project.lix")),
            PathBuf::from("/tmp/project.lix.lock")
        );
    }

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("project.lix");

        let lock = StoreLock::acquire(&store).unwrap();
        assert!(lock.path().exists());

        let err = StoreLock::acquire(&store).unwrap_err();
        assert!(matches!(err, LixError::StoreLocked(_)));

        drop(lock);
        assert!(StoreLock::acquire(&store).is_ok());
    }
}
