use super::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::{cancel::CancellationFlag, config::GitHubConfig, ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Request body for the GitHub wrapper's pull-request endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePullRequest {
    pub owner: String,
    pub repo: String,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub is_draft: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub html_url: String,
    pub state: String,
}

/// Resilient client for the GitHub wrapper service.
///
/// PR creation is a best-effort post-completion hook, so the budget is
/// roomier than the classifier's: 3 attempts, 200 ms base backoff, 5 s
/// per-call timeout.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ForgeError::Http)?;
        Ok(Self {
            http,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::github(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        })
    }

    pub async fn create_pull_request(
        &self,
        request: &CreatePullRequest,
        cancel: &CancellationFlag,
    ) -> Result<PullRequestInfo> {
        if !self.breaker.should_allow_request().await {
            return Err(ForgeError::ServiceUnavailable(
                "GitHub service circuit is open".to_string(),
            ));
        }

        let url = format!("{}/pulls", self.base_url);
        let mut last_error = None;

        for attempt in 0..self.retry.attempts {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }

            let send = self.http.post(&url).json(request).send();
            match tokio::time::timeout(self.timeout, send).await {
                Err(_) => {
                    last_error = Some(ForgeError::Timeout(format!(
                        "GitHub call exceeded {}s",
                        self.timeout.as_secs()
                    )));
                }
                Ok(Err(e)) => {
                    last_error = Some(ForgeError::Transport(format!("GitHub service: {e}")));
                }
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        self.breaker.record_success().await;
                        return response.json::<PullRequestInfo>().await.map_err(|e| {
                            ForgeError::Transport(format!("malformed GitHub body: {e}"))
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        return Err(ForgeError::Remote {
                            status: status.as_u16(),
                            body,
                        });
                    }
                    last_error = Some(ForgeError::Remote {
                        status: status.as_u16(),
                        body,
                    });
                }
            }

            self.breaker.record_failure().await;
            if !self.retry.is_last_attempt(attempt) {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }

        let last_error = last_error.expect("at least one attempt ran");
        warn!(error = %last_error, "GitHub PR creation failed after retries");
        match last_error {
            ForgeError::Timeout(m) => Err(ForgeError::Timeout(m)),
            ForgeError::Remote { status, body } => Err(ForgeError::Remote { status, body }),
            _ => Err(ForgeError::ServiceUnavailable(
                "GitHub service unreachable after retries".to_string(),
            )),
        }
    }

    /// Lightweight health probe; never errors.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(url).timeout(self.timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn breaker_metrics(&self) -> BreakerMetrics {
        self.breaker.metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(url: &str) -> GitHubConfig {
        GitHubConfig {
            service_url: url.to_string(),
            timeout_secs: 2,
            bot_owner: "coding-agent".to_string(),
            bot_repo: "coding-agent".to_string(),
            base_branch: "main".to_string(),
            draft_pull_requests: true,
        }
    }

    fn pull_request() -> CreatePullRequest {
        CreatePullRequest {
            owner: "coding-agent".into(),
            repo: "demo".into(),
            title: "Fix typo".into(),
            body: "Automated change".into(),
            head: "task/abc123".into(),
            base: "main".into(),
            is_draft: true,
        }
    }

    #[tokio::test]
    async fn pr_creation_round_trips_camel_case_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/pulls")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"isDraft": true, "head": "task/abc123"}),
            ))
            .with_status(201)
            .with_body(
                serde_json::json!({
                    "number": 42,
                    "url": "https://api.github.test/pulls/42",
                    "htmlUrl": "https://github.test/demo/pull/42",
                    "state": "open"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GitHubClient::new(&config_for(&server.url())).unwrap();
        let info = client
            .create_pull_request(&pull_request(), &CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(info.number, 42);
        assert_eq!(info.state, "open");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transient_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/pulls")
            .with_status(502)
            .expect(3)
            .create_async()
            .await;

        let client = GitHubClient::new(&config_for(&server.url())).unwrap();
        let err = client
            .create_pull_request(&pull_request(), &CancellationFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ForgeError::Remote { status: 502, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn health_probe_never_errors() {
        let client = GitHubClient::new(&config_for("http://localhost:1")).unwrap();
        assert!(!client.is_available().await);
    }
}
