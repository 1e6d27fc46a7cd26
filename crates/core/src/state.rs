//! # Task State Store
//!
//! Durable mapping from task slug to the last-known deployment facts,
//! persisted as one JSON document rewritten whole on every put. Write volume
//! is one per round completion, so a flat document behind a single async lock
//! is enough; the store is injectable (path-parameterized) so a different
//! backend can replace it without touching orchestration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// Deployment facts recorded for one task. Created on round 1 completion,
/// merged-and-updated on round 2. `repo_name` is assigned exactly once and is
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub repo_name: String,
    pub repo_url: String,
    pub pages_url: String,
    pub last_commit_sha: String,
    pub email: String,
    pub nonce: String,
    pub evaluation_url: String,
    pub pages_ready: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDoc {
    #[serde(default)]
    tasks: HashMap<String, TaskRecord>,
}

/// Whole-document JSON store guarded by one process-wide lock. The lock
/// shields the read-modify-write cycle against concurrent rounds for
/// different tasks sharing the same backing file.
#[derive(Debug)]
pub struct TaskStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TaskStateStore {
    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, task_slug: &str) -> Result<Option<TaskRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await.tasks.get(task_slug).cloned())
    }

    pub async fn put(&self, task_slug: &str, record: TaskRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await;
        doc.tasks.insert(task_slug.to_string(), record);
        self.save(&doc).await
    }

    async fn load(&self) -> StateDoc {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "state file unreadable; starting fresh");
                    StateDoc::default()
                }
            },
            Err(_) => StateDoc::default(),
        }
    }

    async fn save(&self, doc: &StateDoc) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(repo: &str) -> TaskRecord {
        TaskRecord {
            repo_name: repo.to_string(),
            repo_url: format!("https://github.com/octocat/{repo}"),
            pages_url: format!("https://octocat.github.io/{repo}/"),
            last_commit_sha: "abc123".to_string(),
            email: "owner@example.com".to_string(),
            nonce: "abc123xyz".to_string(),
            evaluation_url: "https://eval.example.com/cb".to_string(),
            pages_ready: true,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = TaskStateStore::open_at(dir.path().join("state.json"));

        assert_eq!(store.get("build-a-todo-app").await.unwrap(), None);

        store
            .put("build-a-todo-app", record("build-a-todo-app-abc123"))
            .await
            .unwrap();
        let loaded = store.get("build-a-todo-app").await.unwrap().unwrap();
        assert_eq!(loaded.repo_name, "build-a-todo-app-abc123");
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = TaskStateStore::open_at(&path);
        store.put("demo", record("demo-abc123")).await.unwrap();
        drop(store);

        let store = TaskStateStore::open_at(&path);
        assert!(store.get("demo").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_state_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = TaskStateStore::open_at(&path);
        assert_eq!(store.get("demo").await.unwrap(), None);

        // A put still succeeds and replaces the broken document.
        store.put("demo", record("demo-abc123")).await.unwrap();
        assert!(store.get("demo").await.unwrap().is_some());
    }
}
