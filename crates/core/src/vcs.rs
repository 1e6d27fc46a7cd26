//! # Version Control Client
//!
//! Thin wrapper around `git` subprocess invocations, plus the two policies
//! built on top of it: the commit gate ("nothing to commit" is a no-op, not an
//! error) and the push reconciler (one forced retry on diverged remote
//! history, permission denials surfaced distinctly).
//!
//! No retries live at the `run` layer; retry policy belongs to callers.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{DeployError, Result};

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Executes git commands inside one working directory.
#[derive(Debug, Clone)]
pub struct GitClient {
    workdir: PathBuf,
}

impl GitClient {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run `git <args>` in the working directory, capturing output. With
    /// `must_succeed`, a non-zero exit becomes [`DeployError::VcsCommand`]
    /// carrying the argument list and output verbatim; otherwise the raw
    /// result is returned for caller-side branching.
    pub async fn run(&self, args: &[&str], must_succeed: bool) -> Result<GitOutput> {
        debug!(args = %args.join(" "), workdir = %self.workdir.display(), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            // Credentials ride in the remote URL; never fall back to a prompt.
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await?;

        let result = GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if must_succeed && !result.success {
            return Err(DeployError::VcsCommand {
                args: args.join(" "),
                stdout: or_empty(&result.stdout),
                stderr: or_empty(&result.stderr),
            });
        }
        Ok(result)
    }

    /// Run a command that is expected to succeed.
    pub async fn run_checked(&self, args: &[&str]) -> Result<GitOutput> {
        self.run(args, true).await
    }

    /// Stage either `paths` or the entire tree, then commit. Returns `false`
    /// (not an error) when the commit fails because nothing is staged, so
    /// callers can decide whether a push is worth attempting at all.
    pub async fn commit_if_needed(&self, message: &str, paths: Option<&[&str]>) -> Result<bool> {
        match paths {
            Some(paths) => {
                let mut args = vec!["add"];
                args.extend_from_slice(paths);
                self.run_checked(&args).await?;
            }
            None => {
                self.run_checked(&["add", "."]).await?;
            }
        }

        let commit = self.run(&["commit", "-m", message], false).await?;
        if commit.success {
            return Ok(true);
        }

        let combined = format!("{} {}", commit.stdout, commit.stderr).to_lowercase();
        if combined.contains("nothing to commit") {
            info!(message, "no changes to commit");
            return Ok(false);
        }

        Err(DeployError::VcsCommand {
            args: format!("commit -m {message}"),
            stdout: or_empty(&commit.stdout),
            stderr: or_empty(&commit.stderr),
        })
    }

    /// Attempt the push as given. On a non-fast-forward rejection (and when
    /// `allow_force`), retry exactly once with `-f` injected. A still-failing
    /// push is classified by its stderr: permission denials become
    /// [`DeployError::PushPermission`], anything else [`DeployError::Push`].
    ///
    /// Forcing on conflict is deliberate: this system is the sole writer of
    /// the remote `main` branch, so divergent remote history is staleness to
    /// be overwritten, never something to merge.
    pub async fn push_with_retry(&self, args: &[&str], allow_force: bool) -> Result<()> {
        let first = self.run(args, false).await?;
        if first.success {
            return Ok(());
        }

        let stderr = first.stderr.to_lowercase();
        if allow_force && (stderr.contains("non-fast-forward") || stderr.contains("fetch first")) {
            info!("retrying git push with --force due to remote history");
            let mut forced: Vec<&str> = args.to_vec();
            if !forced.iter().any(|a| *a == "-f" || *a == "--force") {
                forced.insert(1, "-f");
            }
            let second = self.run(&forced, false).await?;
            if second.success {
                return Ok(());
            }
            return Err(classify_push_failure(&second));
        }

        Err(classify_push_failure(&first))
    }

    /// Resolve the current HEAD commit id.
    pub async fn rev_parse_head(&self) -> Result<String> {
        let out = self.run_checked(&["rev-parse", "HEAD"]).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Clone `remote` into `destination` and return a client for it.
    pub async fn clone_into(remote: &str, destination: &Path) -> Result<GitClient> {
        let output = Command::new("git")
            .args(["clone", remote, &destination.to_string_lossy()])
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await?;
        if !output.status.success() {
            return Err(DeployError::VcsCommand {
                args: "clone <remote> <destination>".to_string(),
                stdout: or_empty(&String::from_utf8_lossy(&output.stdout)),
                stderr: or_empty(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(GitClient::new(destination))
    }
}

/// Classify a failed push by its stderr. The substrings are the only signal
/// git offers (there is no structured error channel); tests pin them.
pub fn classify_push_failure(output: &GitOutput) -> DeployError {
    let stderr = output.stderr.trim();
    if stderr.contains("Permission to") && stderr.contains("denied") {
        return DeployError::PushPermission {
            stderr: stderr.to_string(),
        };
    }
    DeployError::Push {
        stdout: or_empty(&output.stdout),
        stderr: or_empty(stderr),
    }
}

fn or_empty(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "<empty>".to_string()
    } else {
        trimmed.to_string()
    }
}
