//! Per-request scratch directories.
//!
//! Every conversion runs inside its own [`Workspace`], a randomly named
//! directory under the configured root. The directory is removed by
//! [`Workspace::release`] on the normal path and by `Drop` when the request
//! future is abandoned, so nothing accumulates under the root.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const INPUT_DIR: &str = "input";
const OUTPUT_DIR: &str = "output";

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh workspace with empty `input/` and `output/` subtrees.
    pub async fn acquire(&self) -> Result<Workspace> {
        let root = self.root.clone();
        let dir = tokio::task::spawn_blocking(move || -> std::io::Result<TempDir> {
            std::fs::create_dir_all(&root)?;
            let dir = tempfile::Builder::new().prefix("ws-").tempdir_in(&root)?;
            std::fs::create_dir(dir.path().join(INPUT_DIR))?;
            std::fs::create_dir(dir.path().join(OUTPUT_DIR))?;
            Ok(dir)
        })
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("workspace task failed: {}", e)))??;

        debug!("Acquired workspace {}", dir.path().display());
        Ok(Workspace { dir })
    }
}

/// Exclusively owned directory scoped to one request.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_dir(&self) -> PathBuf {
        self.dir.path().join(INPUT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_DIR)
    }

    /// Recursively delete the workspace. Consumes it, so it runs at most once.
    pub async fn release(self) {
        let path = self.dir.path().to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || self.dir.close()).await;

        match outcome {
            Ok(Ok(())) => debug!("Released workspace {}", path.display()),
            Ok(Err(e)) => warn!("Failed to remove workspace {}: {}", path.display(), e),
            Err(e) => warn!("Workspace cleanup task for {} failed: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_creates_isolated_directories() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("workspaces"));

        let first = manager.acquire().await.unwrap();
        let second = manager.acquire().await.unwrap();

        assert_ne!(first.path(), second.path());
        assert!(first.input_dir().is_dir());
        assert!(first.output_dir().is_dir());
        assert!(first.path().starts_with(manager.root()));

        first.release().await;
        second.release().await;
    }

    #[tokio::test]
    async fn test_release_removes_contents() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let workspace = manager.acquire().await.unwrap();
        let path = workspace.path().to_path_buf();
        tokio::fs::write(workspace.output_dir().join("result.pdf"), b"%PDF")
            .await
            .unwrap();

        workspace.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());

        let path = {
            let workspace = manager.acquire().await.unwrap();
            workspace.path().to_path_buf()
        };

        assert!(!path.exists());
    }
}
