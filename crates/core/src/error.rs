//! # Error Taxonomy
//!
//! Closed set of failure kinds for the publish pipeline. Callers match on
//! variants instead of scraping strings out of subprocess output; the one
//! place stderr text is inspected (push classification) lives in [`crate::vcs`]
//! and is pinned by tests there.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    /// A required identity or token is absent. Nothing proceeds without it.
    #[error("credentials missing: {0}")]
    CredentialsMissing(String),

    /// A git invocation returned non-zero outside the recognized soft cases.
    /// Carries the captured output verbatim for operator diagnosis.
    #[error("git command failed: git {args}\nstdout: {stdout}\nstderr: {stderr}")]
    VcsCommand {
        args: String,
        stdout: String,
        stderr: String,
    },

    /// The remote rejected the push with a permission denial. This usually
    /// means the PAT lacks the `repo` scope or is a fine-grained token that
    /// does not cover newly created repositories.
    #[error(
        "GitHub rejected the push (permission denied). This usually happens when the \
         PAT lacks the `repo` scope or is a fine-grained token that does not include \
         newly created repositories. Create a new Personal Access Token (classic) with \
         at least the `repo` scope, update GITHUB_TOKEN, restart the server, and re-run \
         the build.\nOriginal git error:\n{stderr}"
    )]
    PushPermission { stderr: String },

    /// Generic push failure (anything the permission pattern does not match).
    #[error("git push failed.\nstdout: {stdout}\nstderr: {stderr}")]
    Push { stdout: String, stderr: String },

    /// The content-generation collaborator failed; no partial publish is attempted.
    #[error("content generation failed: {0}")]
    Generation(String),

    /// Round 2 was triggered for a task with no recorded round 1.
    #[error("no round 1 state recorded for task '{0}'")]
    UnknownTask(String),

    /// The publish URL never returned a success status within the deadline.
    #[error("published site never became reachable at {url} after {waited_secs}s")]
    PublishNotReady { url: String, waited_secs: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("state file is not valid JSON: {0}")]
    State(#[from] serde_json::Error),
}
