//! Cross-process advisory lock per cache entry

use crate::error::{BuildError, BuildResult};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive `flock`-style lock on a file, released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block (off the async runtime) until the lock is held
    pub async fn acquire(path: &Path) -> BuildResult<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| BuildError::CacheLock {
                    path: path.clone(),
                    source: e,
                })?;
            fs2::FileExt::lock_exclusive(&file).map_err(|e| BuildError::CacheLock {
                path: path.clone(),
                source: e,
            })?;
            debug!("Locked {}", path.display());
            Ok(Self { file, path })
        })
        .await
        .map_err(|e| BuildError::Internal(format!("lock task failed: {}", e)))?
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entry.lock");

        let first = FileLock::acquire(&path).await.unwrap();
        let waiter = {
            let path = path.clone();
            tokio::spawn(async move { FileLock::acquire(&path).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("lock should be released")
            .unwrap();
        assert!(second.is_ok());
    }
}
