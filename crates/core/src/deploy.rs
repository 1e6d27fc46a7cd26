//! # Deployment Orchestrator
//!
//! Drives one round end to end: prepare a clean working directory, generate
//! content, publish through git, activate hosting, verify reachability,
//! record the deployment facts, and notify the evaluator. Round 1 creates a
//! new repository; round 2 resumes round 1's target from the state store and
//! republishes on top of a fresh clone.
//!
//! Failures anywhere up to and including verification abort the round;
//! hosting activation and evaluator notification never do.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{DeployError, Result};
use crate::generate::{Attachment, GenerationRequest, SiteGenerator};
use crate::hosting::{GithubClient, ReadinessPoller};
use crate::notify::{EvaluationNotifier, EvaluationPayload};
use crate::scaffold;
use crate::state::{TaskRecord, TaskStateStore};
use crate::vcs::GitClient;
use crate::workdir::Workspace;

/// Inbound trigger contract. The synchronous response never reflects round
/// success or failure; those surface only through logs and recorded state.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildRequest {
    pub secret: String,
    pub brief: String,
    pub email: String,
    pub task: String,
    pub nonce: String,
    #[serde(default = "default_round")]
    pub round: u32,
    pub evaluation_url: String,
    #[serde(default)]
    pub student: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn default_round() -> u32 {
    1
}

/// Return contract of a publish operation.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub repo_url: String,
    pub pages_url: String,
    pub commit_sha: String,
}

/// Round progression markers. `FAILED` is implicit: any error unwinds the
/// round from whichever phase raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparing,
    Generating,
    Publishing,
    Activating,
    Verifying,
    Recording,
    Notifying,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Preparing => "preparing",
            Phase::Generating => "generating",
            Phase::Publishing => "publishing",
            Phase::Activating => "activating",
            Phase::Verifying => "verifying",
            Phase::Recording => "recording",
            Phase::Notifying => "notifying",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composes the publish pipeline for both rounds.
pub struct Orchestrator<G> {
    settings: Settings,
    store: Arc<TaskStateStore>,
    generator: G,
    github: GithubClient,
    poller: ReadinessPoller,
    notifier: EvaluationNotifier,
    workspace: Workspace,
}

impl<G: SiteGenerator> Orchestrator<G> {
    pub fn new(settings: Settings, store: Arc<TaskStateStore>, generator: G) -> Self {
        let github = GithubClient::new(&settings);
        let workspace = Workspace::new(settings.workdir_root.clone());
        Self {
            settings,
            store,
            generator,
            github,
            poller: ReadinessPoller::new(),
            notifier: EvaluationNotifier::new(),
            workspace,
        }
    }

    /// Entry point for a background task: runs the round and absorbs its
    /// outcome into logs, matching the trigger contract.
    pub async fn process(&self, req: BuildRequest) {
        let round = req.round;
        let result = match round {
            1 => self.run_round_one(&req).await.map(|_| ()),
            2 => self.run_round_two(&req).await.map(|_| ()),
            other => {
                warn!(task = %req.task, round = other, "unsupported round");
                return;
            }
        };
        if let Err(err) = result {
            error!(task = %req.task, round, error = %err, "round processing failed");
        }
    }

    /// Round 1: create a repository for the task and publish the generated
    /// site into it.
    pub async fn run_round_one(&self, req: &BuildRequest) -> Result<DeploymentRecord> {
        let task_slug = scaffold::slugify(&req.task);
        let repo_name = scaffold::repo_name_for(&req.task, &req.nonce);
        info!(task = %req.task, repo = %repo_name, "round 1 start");

        info!(phase = %Phase::Preparing, repo = %repo_name);
        let dir = self.workspace.recreate(&repo_name).await?;

        info!(phase = %Phase::Generating, repo = %repo_name);
        self.generator.generate(&generation_request(req), &dir).await?;

        info!(phase = %Phase::Publishing, repo = %repo_name);
        let pages_url = self.settings.pages_url(&repo_name);
        scaffold::write_aux_files(&dir, &req.email, &repo_name, &pages_url, &req.brief, req.round)
            .await?;
        self.github.ensure_repository(&repo_name).await;
        let git = GitClient::new(&dir);
        let identity = self.identity();
        let (_, commit_sha) = publish_new_tree(
            &git,
            &self.settings.remote_url(&repo_name),
            (&identity.0, &identity.1),
        )
        .await?;
        let record = DeploymentRecord {
            repo_url: self.settings.repo_url(&repo_name),
            pages_url,
            commit_sha,
        };

        self.activate_and_verify(&repo_name, &record).await?;

        info!(phase = %Phase::Recording, repo = %repo_name);
        self.store
            .put(
                &task_slug,
                TaskRecord {
                    repo_name,
                    repo_url: record.repo_url.clone(),
                    pages_url: record.pages_url.clone(),
                    last_commit_sha: record.commit_sha.clone(),
                    email: req.email.clone(),
                    nonce: req.nonce.clone(),
                    evaluation_url: req.evaluation_url.clone(),
                    pages_ready: true,
                },
            )
            .await?;

        info!(phase = %Phase::Notifying, task = %req.task);
        self.notifier
            .notify(&req.evaluation_url, &evaluation_payload(req, &record))
            .await;
        Ok(record)
    }

    /// Round 2: resume the repository assigned in round 1 (never re-derive
    /// its name), clone it fresh, regenerate, and republish.
    pub async fn run_round_two(&self, req: &BuildRequest) -> Result<DeploymentRecord> {
        let task_slug = scaffold::slugify(&req.task);

        info!(phase = %Phase::Preparing, task = %req.task);
        let prior = self
            .store
            .get(&task_slug)
            .await?
            .ok_or_else(|| DeployError::UnknownTask(req.task.clone()))?;
        let repo_name = prior.repo_name.clone();
        info!(task = %req.task, repo = %repo_name, "round 2 start");

        let dir = self.workspace.clear(&repo_name).await?;
        let remote = self.settings.remote_url(&repo_name);
        let git = GitClient::clone_into(&remote, &dir).await?;

        info!(phase = %Phase::Generating, repo = %repo_name);
        self.generator.generate(&generation_request(req), &dir).await?;

        info!(phase = %Phase::Publishing, repo = %repo_name);
        let pages_url = self.settings.pages_url(&repo_name);
        scaffold::write_aux_files(&dir, &req.email, &repo_name, &pages_url, &req.brief, req.round)
            .await?;
        let identity = self.identity();
        let (_, commit_sha) =
            publish_update_tree(&git, &remote, (&identity.0, &identity.1), "Round 2 update")
                .await?;
        let record = DeploymentRecord {
            repo_url: self.settings.repo_url(&repo_name),
            pages_url,
            commit_sha,
        };

        self.activate_and_verify(&repo_name, &record).await?;

        info!(phase = %Phase::Recording, repo = %repo_name);
        self.store
            .put(
                &task_slug,
                TaskRecord {
                    repo_name,
                    repo_url: record.repo_url.clone(),
                    pages_url: record.pages_url.clone(),
                    last_commit_sha: record.commit_sha.clone(),
                    // Identity facts stay as recorded in round 1.
                    email: prior.email,
                    nonce: prior.nonce,
                    evaluation_url: prior.evaluation_url,
                    pages_ready: true,
                },
            )
            .await?;

        info!(phase = %Phase::Notifying, task = %req.task);
        self.notifier
            .notify(&req.evaluation_url, &evaluation_payload(req, &record))
            .await;
        Ok(record)
    }

    /// Best-effort hosting activation followed by the fatal-on-timeout
    /// readiness check shared by both rounds.
    async fn activate_and_verify(&self, repo_name: &str, record: &DeploymentRecord) -> Result<()> {
        info!(phase = %Phase::Activating, repo = %repo_name);
        self.github.enable_pages(repo_name).await;
        self.github.trigger_rebuild(repo_name).await;

        info!(phase = %Phase::Verifying, repo = %repo_name);
        let timeout = Duration::from_secs(self.settings.pages_timeout_secs);
        let interval = Duration::from_secs(self.settings.pages_interval_secs);
        if !self
            .poller
            .wait_until_ready(&record.pages_url, timeout, interval)
            .await
        {
            return Err(DeployError::PublishNotReady {
                url: record.pages_url.clone(),
                waited_secs: timeout.as_secs(),
            });
        }
        Ok(())
    }

    /// Committer identity for the working copies this process creates.
    fn identity(&self) -> (String, String) {
        let name = self.settings.github_username.clone();
        let email = format!("{name}@users.noreply.github.com");
        (name, email)
    }
}

fn generation_request(req: &BuildRequest) -> GenerationRequest {
    GenerationRequest {
        brief: req.brief.clone(),
        task: req.task.clone(),
        round: req.round,
        attachments: req.attachments.clone(),
    }
}

fn evaluation_payload(req: &BuildRequest, record: &DeploymentRecord) -> EvaluationPayload {
    EvaluationPayload {
        email: req.email.clone(),
        task: req.task.clone(),
        round: req.round,
        nonce: req.nonce.clone(),
        repo_url: record.repo_url.clone(),
        commit_sha: record.commit_sha.clone(),
        pages_url: record.pages_url.clone(),
    }
}

/// Round 1 publish: initialize version control, point `origin` at the remote,
/// commit infrastructure and content as two independent gates, and push once
/// iff at least one gate fired. Returns whether a push happened and the
/// resulting HEAD.
pub(crate) async fn publish_new_tree(
    git: &GitClient,
    remote_url: &str,
    identity: (&str, &str),
) -> Result<(bool, String)> {
    git.run_checked(&["init"]).await?;
    git.run_checked(&["checkout", "-B", "main"]).await?;
    git.run_checked(&["config", "user.name", identity.0]).await?;
    git.run_checked(&["config", "user.email", identity.1]).await?;

    // A leftover origin from an interrupted attempt is fine to lose.
    git.run(&["remote", "remove", "origin"], false).await?;
    git.run_checked(&["remote", "add", "origin", remote_url]).await?;

    let workflow_committed = git
        .commit_if_needed("Configure GitHub Pages workflow", Some(&[".github"]))
        .await?;
    let content_committed = git.commit_if_needed("Round 1 scaffold", None).await?;

    let pushed = workflow_committed || content_committed;
    if pushed {
        git.push_with_retry(&["push", "-u", "origin", "main"], true)
            .await?;
    } else {
        info!("nothing to commit in either gate; skipping push");
    }

    let commit_sha = git.rev_parse_head().await?;
    Ok((pushed, commit_sha))
}

/// Round 2 publish: ensure `origin` points at the current remote, commit the
/// whole tree once, and push only when that commit fired. The initial push is
/// unforced; force remains available as a fallback on rejection since this
/// process is the sole writer of `main`.
pub(crate) async fn publish_update_tree(
    git: &GitClient,
    remote_url: &str,
    identity: (&str, &str),
    message: &str,
) -> Result<(bool, String)> {
    git.run_checked(&["config", "user.name", identity.0]).await?;
    git.run_checked(&["config", "user.email", identity.1]).await?;

    let remotes = git.run_checked(&["remote"]).await?;
    if remotes.stdout.lines().any(|r| r.trim() == "origin") {
        git.run_checked(&["remote", "set-url", "origin", remote_url])
            .await?;
    } else {
        git.run_checked(&["remote", "add", "origin", remote_url]).await?;
    }

    let committed = git.commit_if_needed(message, None).await?;
    if committed {
        git.push_with_retry(&["push", "origin", "main"], true).await?;
    } else {
        info!("no changes to push");
    }

    let commit_sha = git.rev_parse_head().await?;
    Ok((committed, commit_sha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct RecordingGenerator {
        called: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl SiteGenerator for RecordingGenerator {
        async fn generate(&self, _request: &GenerationRequest, output_dir: &Path) -> Result<()> {
            self.called.store(true, Ordering::SeqCst);
            tokio::fs::write(output_dir.join("index.html"), "<html></html>").await?;
            Ok(())
        }
    }

    fn settings(root: &Path) -> Settings {
        Settings {
            github_username: "octocat".into(),
            github_token: "tok".into(),
            trigger_secret: "s3cret".into(),
            llm_api_url: String::new(),
            llm_api_key: None,
            llm_model: String::new(),
            api_base: "http://127.0.0.1:9".into(),
            state_path: root.join("state.json"),
            workdir_root: root.join("work"),
            pages_timeout_secs: 1,
            pages_interval_secs: 1,
        }
    }

    fn request(round: u32) -> BuildRequest {
        BuildRequest {
            secret: "s3cret".into(),
            brief: "Build a todo app".into(),
            email: "owner@example.com".into(),
            task: "Build a todo app".into(),
            nonce: "abc123xyz".into(),
            round,
            evaluation_url: "http://127.0.0.1:9/cb".into(),
            student: None,
            attachments: Vec::new(),
        }
    }

    async fn init_bare_remote() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let git = GitClient::new(dir.path());
        git.run_checked(&["init", "--bare"]).await.unwrap();
        // Point HEAD at main so clones of the freshly pushed branch work.
        git.run_checked(&["symbolic-ref", "HEAD", "refs/heads/main"])
            .await
            .unwrap();
        (dir, git.workdir().to_string_lossy().into_owned())
    }

    const IDENTITY: (&str, &str) = ("ci", "ci@example.com");

    /// Lay out the tree write_aux_files guarantees before a publish: the
    /// workflow directory plus a content entry point.
    fn seed_tree(dir: &Path, html: &str) {
        std::fs::create_dir_all(dir.join(".github/workflows")).unwrap();
        std::fs::write(dir.join(".github/workflows/pages.yml"), "name: x").unwrap();
        std::fs::write(dir.join("index.html"), html).unwrap();
    }

    #[tokio::test]
    async fn round_two_without_prior_state_fails_before_any_work() {
        let root = TempDir::new().unwrap();
        let called = Arc::new(AtomicBool::new(false));
        let store = Arc::new(TaskStateStore::open_at(root.path().join("state.json")));
        let orchestrator = Orchestrator::new(
            settings(root.path()),
            store,
            RecordingGenerator {
                called: called.clone(),
            },
        );

        let err = orchestrator
            .run_round_two(&request(2))
            .await
            .expect_err("no round 1 state");
        assert!(matches!(err, DeployError::UnknownTask(_)));
        assert!(!called.load(Ordering::SeqCst));
        // The working directory area was never touched either.
        assert!(!root.path().join("work").join("build-a-todo-app-abc123").exists());
    }

    #[test]
    fn build_request_defaults_round_and_attachments() {
        let req: BuildRequest = serde_json::from_value(serde_json::json!({
            "secret": "s",
            "brief": "b",
            "email": "e@example.com",
            "task": "Demo",
            "nonce": "n0nce!",
            "evaluation_url": "https://eval.example.com",
        }))
        .unwrap();
        assert_eq!(req.round, 1);
        assert!(req.attachments.is_empty());
        assert_eq!(req.student, None);
    }

    #[tokio::test]
    async fn fresh_tree_publishes_with_one_push() {
        let (remote_dir, remote) = init_bare_remote().await;
        let work = TempDir::new().unwrap();
        seed_tree(work.path(), "<html></html>");

        let git = GitClient::new(work.path());
        let (pushed, sha) = publish_new_tree(&git, &remote, IDENTITY).await.unwrap();
        assert!(pushed);

        let remote_head = GitClient::new(remote_dir.path()).rev_parse_head().await.unwrap();
        assert_eq!(sha, remote_head);
    }

    #[tokio::test]
    async fn workflow_only_change_still_pushes() {
        let (_remote_dir, remote) = init_bare_remote().await;
        let work = TempDir::new().unwrap();
        // Only infrastructure present: the content gate finds nothing.
        std::fs::create_dir_all(work.path().join(".github/workflows")).unwrap();
        std::fs::write(work.path().join(".github/workflows/pages.yml"), "name: x").unwrap();

        let git = GitClient::new(work.path());
        let (pushed, _) = publish_new_tree(&git, &remote, IDENTITY).await.unwrap();
        assert!(pushed);
    }

    #[tokio::test]
    async fn clean_clone_republish_skips_the_push() {
        let (remote_dir, remote) = init_bare_remote().await;

        // Seed the remote through a round-1 style publish.
        let seed = TempDir::new().unwrap();
        seed_tree(seed.path(), "<html>v1</html>");
        let git = GitClient::new(seed.path());
        publish_new_tree(&git, &remote, IDENTITY).await.unwrap();
        let seeded_head = GitClient::new(remote_dir.path()).rev_parse_head().await.unwrap();

        // Republishing an unchanged clone commits nothing and pushes nothing.
        let clone_dir = TempDir::new().unwrap();
        let clone = GitClient::clone_into(&remote, &clone_dir.path().join("repo"))
            .await
            .unwrap();
        let (pushed, sha) = publish_update_tree(&clone, &remote, IDENTITY, "Round 2 update")
            .await
            .unwrap();
        assert!(!pushed);
        assert_eq!(sha, seeded_head);
    }

    #[tokio::test]
    async fn changed_clone_republish_advances_the_remote() {
        let (remote_dir, remote) = init_bare_remote().await;

        let seed = TempDir::new().unwrap();
        seed_tree(seed.path(), "<html>v1</html>");
        let git = GitClient::new(seed.path());
        publish_new_tree(&git, &remote, IDENTITY).await.unwrap();

        let clone_dir = TempDir::new().unwrap();
        let clone = GitClient::clone_into(&remote, &clone_dir.path().join("repo"))
            .await
            .unwrap();
        std::fs::write(clone.workdir().join("index.html"), "<html>v2</html>").unwrap();
        let (pushed, sha) = publish_update_tree(&clone, &remote, IDENTITY, "Round 2 update")
            .await
            .unwrap();
        assert!(pushed);

        let remote_head = GitClient::new(remote_dir.path()).rev_parse_head().await.unwrap();
        assert_eq!(sha, remote_head);
    }

    #[test]
    fn phases_render_for_log_context() {
        assert_eq!(Phase::Preparing.to_string(), "preparing");
        assert_eq!(Phase::Verifying.to_string(), "verifying");
    }
}
