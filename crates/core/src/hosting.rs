//! # Hosting Activation & Readiness
//!
//! GitHub REST calls around the push: idempotent repository creation, Pages
//! enablement, rebuild triggering, and the poll loop that waits for the
//! published URL to come alive. Activation calls are best-effort and never
//! abort an otherwise-successful deployment; readiness is the caller's call.

use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::retry::Backoff;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const API_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the hosting provider's REST API, scoped to one owner account.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    owner: String,
    token: String,
}

impl GithubClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            owner: settings.github_username.clone(),
            token: settings.github_token.clone(),
        }
    }

    /// Create the repository if it does not exist yet. 201 means created and
    /// 422 means it already exists; both are success. Anything else is logged
    /// and left for the push itself to surface as a real failure.
    pub async fn ensure_repository(&self, repo_name: &str) {
        let url = format!("{}/user/repos", self.api_base);
        let payload = json!({ "name": repo_name, "private": false, "auto_init": false });
        match self.post(&url, Some(payload)).await {
            Ok(resp) => match resp.status() {
                StatusCode::CREATED => info!(repo = repo_name, "created repository"),
                StatusCode::UNPROCESSABLE_ENTITY => {
                    debug!(repo = repo_name, "repository already exists")
                }
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    warn!(repo = repo_name, %status, body, "could not ensure repository");
                }
            },
            Err(err) => warn!(repo = repo_name, %err, "repository creation request failed"),
        }
    }

    /// Enable the Pages feature for a repository, serving `main` from the
    /// root. "Created" and "already enabled" are both success.
    pub async fn enable_pages(&self, repo_name: &str) {
        let url = format!("{}/repos/{}/{}/pages", self.api_base, self.owner, repo_name);
        let payload = json!({ "source": { "branch": "main", "path": "/" } });
        match self.post(&url, Some(payload)).await {
            Ok(resp) => match resp.status() {
                StatusCode::CREATED | StatusCode::NO_CONTENT => {
                    info!(repo = repo_name, "enabled GitHub Pages")
                }
                StatusCode::CONFLICT => info!(repo = repo_name, "GitHub Pages already enabled"),
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    warn!(repo = repo_name, %status, body, "could not enable GitHub Pages");
                }
            },
            Err(err) => warn!(repo = repo_name, %err, "Pages enablement request failed"),
        }
    }

    /// Request a fresh Pages build. Same non-fatal contract as enablement.
    pub async fn trigger_rebuild(&self, repo_name: &str) {
        let url = format!(
            "{}/repos/{}/{}/pages/builds",
            self.api_base, self.owner, repo_name
        );
        match self.post(&url, None).await {
            Ok(resp) => match resp.status() {
                StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
                    info!(repo = repo_name, "triggered GitHub Pages build")
                }
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    warn!(repo = repo_name, %status, body, "Pages build trigger failed");
                }
            },
            Err(err) => warn!(repo = repo_name, %err, "Pages build trigger request failed"),
        }
    }

    async fn post(
        &self,
        url: &str,
        payload: Option<serde_json::Value>,
    ) -> reqwest::Result<reqwest::Response> {
        let mut req = self
            .http
            .post(url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .timeout(API_TIMEOUT);
        if let Some(payload) = payload {
            req = req.json(&payload);
        }
        req.send().await
    }
}

/// Polls a published URL until it answers with a success status or the
/// deadline elapses.
#[derive(Debug, Clone, Default)]
pub struct ReadinessPoller {
    http: reqwest::Client,
}

impl ReadinessPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `url` with cache bypassed until it returns a success status.
    /// Network errors mean "not yet ready". Returns `false` on deadline, so
    /// the caller decides whether an unreachable site fails the round.
    pub async fn wait_until_ready(&self, url: &str, timeout: Duration, interval: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::fixed(interval);
        while Instant::now() < deadline {
            match self
                .http
                .get(url)
                .header(CACHE_CONTROL, "no-cache")
                .timeout(PROBE_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    info!(url, "published site is reachable");
                    return true;
                }
                Ok(resp) => info!(url, status = %resp.status(), "waiting for published site"),
                Err(err) => info!(url, %err, "waiting for published site"),
            }
            if let Some(delay) = backoff.next() {
                tokio::time::sleep(delay).await;
            }
        }
        warn!(url, timeout_secs = timeout.as_secs(), "published site never became reachable");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;

    #[tokio::test]
    async fn poller_returns_true_on_first_success() {
        let server = StubServer::start(200, "<html></html>").await;

        let poller = ReadinessPoller::new();
        let ready = poller
            .wait_until_ready(&server.url, Duration::from_secs(5), Duration::from_millis(20))
            .await;
        assert!(ready);
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn poller_returns_false_after_deadline_without_success() {
        let server = StubServer::start(404, "").await;

        let poller = ReadinessPoller::new();
        let ready = poller
            .wait_until_ready(
                &server.url,
                Duration::from_millis(150),
                Duration::from_millis(30),
            )
            .await;
        assert!(!ready);
        assert!(server.hits() >= 2);
    }

    #[tokio::test]
    async fn activation_is_best_effort() {
        // An endpoint that rejects everything must not panic or error out.
        let server = StubServer::start(500, "{}").await;
        let settings = crate::config::Settings {
            github_username: "octocat".into(),
            github_token: "tok".into(),
            trigger_secret: "s".into(),
            llm_api_url: String::new(),
            llm_api_key: None,
            llm_model: String::new(),
            api_base: server.url.clone(),
            state_path: "state.json".into(),
            workdir_root: std::env::temp_dir(),
            pages_timeout_secs: 1,
            pages_interval_secs: 1,
        };

        let client = GithubClient::new(&settings);
        client.ensure_repository("demo-abc123").await;
        client.enable_pages("demo-abc123").await;
        client.trigger_rebuild("demo-abc123").await;
        assert_eq!(server.hits(), 3);
    }
}
