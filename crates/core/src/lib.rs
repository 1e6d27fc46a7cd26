//! # Pageforge Core
//!
//! Business logic for Pageforge: accept a natural-language brief, have a
//! hosted LLM produce a static site, publish it to GitHub Pages through a
//! git push, wait for the deployment to come alive, and report completion to
//! an external evaluator. Two rounds per task: round 1 creates a repository,
//! round 2 updates it while preserving history.
//!
//! ## Architecture
//!
//! - [`vcs`] / [`workdir`] - git subprocess client, commit gate, push
//!   reconciler, and the ephemeral per-repository working trees
//! - [`generate`] / [`scaffold`] - LLM content generation and the
//!   deterministic auxiliary files around it
//! - [`hosting`] / [`notify`] / [`retry`] - Pages activation, readiness
//!   polling, and the evaluation callback with its backoff schedule
//! - [`state`] - durable per-task deployment facts keyed by task slug
//! - [`deploy`] - the orchestrator composing all of the above per round

pub mod config;
pub mod deploy;
pub mod error;
pub mod generate;
pub mod hosting;
pub mod notify;
pub mod retry;
pub mod scaffold;
pub mod state;
#[cfg(test)]
pub(crate) mod test_support;
pub mod vcs;
pub mod workdir;

pub use config::Settings;
pub use deploy::{BuildRequest, DeploymentRecord, Orchestrator};
pub use error::{DeployError, Result};
pub use generate::{LlmGenerator, SiteGenerator};
pub use state::TaskStateStore;
