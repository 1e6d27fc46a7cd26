//! # Working Directories
//!
//! Ephemeral, per-repository working trees under one root. Before each round
//! any prior contents for the repository name are destroyed, so a retried or
//! duplicated round never inherits leftovers from an earlier attempt.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::Result;

/// Allocates and wipes per-repository working directories.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory assigned to a repository name.
    pub fn dir_for(&self, repo_name: &str) -> PathBuf {
        self.root.join(repo_name)
    }

    /// Destroy any previous tree and create an empty directory (round 1).
    pub async fn recreate(&self, repo_name: &str) -> Result<PathBuf> {
        let dir = self.clear(repo_name).await?;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Destroy any previous tree, leaving the path absent so a clone can
    /// create it (round 2).
    pub async fn clear(&self, repo_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).await?;
        let dir = self.dir_for(repo_name);
        remove_tree(&dir).await?;
        Ok(dir)
    }
}

async fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn recreate_destroys_leftovers() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::new(root.path());

        let dir = ws.recreate("demo-abc123").await.unwrap();
        std::fs::write(dir.join("stale.html"), "old attempt").unwrap();

        let dir = ws.recreate("demo-abc123").await.unwrap();
        assert!(dir.exists());
        assert!(!dir.join("stale.html").exists());
    }

    #[tokio::test]
    async fn clear_leaves_path_absent_for_clone() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::new(root.path());

        let dir = ws.recreate("demo-abc123").await.unwrap();
        assert!(dir.exists());

        let dir = ws.clear("demo-abc123").await.unwrap();
        assert!(!dir.exists());
    }
}
