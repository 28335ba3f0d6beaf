//! Worker-local scratch management.
//!
//! Each handler owns one scratch subtree keyed by a fresh UUID; nothing
//! in scratch outlives the job, and anything that does (a crashed
//! worker's leftovers) is reaped by the disk monitor's temp cleaner.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

/// Prefix shared by all job scratch trees; the temp cleaner only touches
/// directories carrying it.
pub const SCRATCH_DIR_PREFIX: &str = "job-";

#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    removed: bool,
}

impl ScratchDir {
    pub async fn create(base: &Path) -> std::io::Result<Self> {
        let root = base.join(format!("{SCRATCH_DIR_PREFIX}{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    /// Explicit async removal; preferred over relying on `Drop`.
    pub async fn remove(mut self) {
        self.removed = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch {:?}: {e}", self.root);
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Last-resort synchronous cleanup on early exits.
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch {:?} on drop: {e}", self.root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scratch_is_unique_and_removed() {
        let base = tempfile::tempdir().unwrap();
        let a = ScratchDir::create(base.path()).await.unwrap();
        let b = ScratchDir::create(base.path()).await.unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().exists());

        let path = a.path().to_path_buf();
        a.remove().await;
        assert!(!path.exists());
        assert!(b.path().exists());
    }

    #[tokio::test]
    async fn drop_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create(base.path()).await.unwrap();
            tokio::fs::write(scratch.join("partial.ts"), b"x")
                .await
                .unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
