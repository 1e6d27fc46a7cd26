//! # Evaluation Notifier
//!
//! Posts completion facts to the caller-supplied evaluation URL. Best-effort:
//! up to five attempts with exponential backoff, and exhaustion is logged
//! rather than raised — the round does not fail because the evaluator could
//! not be reached.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::retry::Backoff;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Outbound notification payload.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

#[derive(Debug, Clone)]
pub struct EvaluationNotifier {
    http: reqwest::Client,
    max_attempts: usize,
    initial_backoff: Duration,
}

impl Default for EvaluationNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationNotifier {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// Shrink the backoff unit (tests only need milliseconds).
    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// POST the payload until the evaluator answers 200, backing off
    /// 1, 2, 4, 8, 16 units across the five attempts.
    pub async fn notify(&self, callback_url: &str, payload: &EvaluationPayload) {
        let mut backoff = Backoff::exponential(self.initial_backoff);
        for attempt in 1..=self.max_attempts {
            match self
                .http
                .post(callback_url)
                .timeout(REQUEST_TIMEOUT)
                .json(payload)
                .send()
                .await
            {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    info!(round = payload.round, "evaluation callback succeeded");
                    return;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(attempt, %status, body, "evaluation callback failed");
                }
                Err(err) => warn!(attempt, %err, "evaluation callback error"),
            }
            if let Some(delay) = backoff.next() {
                tokio::time::sleep(delay).await;
            }
        }
        error!(
            attempts = self.max_attempts,
            "failed to notify evaluation service after retries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;

    fn payload() -> EvaluationPayload {
        EvaluationPayload {
            email: "owner@example.com".into(),
            task: "Build a todo app".into(),
            round: 1,
            nonce: "abc123xyz".into(),
            repo_url: "https://github.com/octocat/build-a-todo-app-abc123".into(),
            commit_sha: "deadbeef".into(),
            pages_url: "https://octocat.github.io/build-a-todo-app-abc123/".into(),
        }
    }

    #[tokio::test]
    async fn stops_after_first_success() {
        let server = StubServer::start(200, "{}").await;
        let notifier = EvaluationNotifier::new().with_initial_backoff(Duration::from_millis(1));

        notifier.notify(&server.url, &payload()).await;
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn gives_up_silently_after_five_attempts() {
        let server = StubServer::start(500, "{}").await;
        let notifier = EvaluationNotifier::new().with_initial_backoff(Duration::from_millis(2));

        let started = std::time::Instant::now();
        notifier.notify(&server.url, &payload()).await;

        assert_eq!(server.hits(), 5);
        // Backoff schedule 1+2+4+8+16 units must have elapsed.
        assert!(started.elapsed() >= Duration::from_millis(2 * 31));
    }
}
