use super::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::{
    cancel::CancellationFlag,
    config::ClassifierConfig,
    models::{ClassificationRequest, ClassificationResponse, TaskComplexity, TaskType},
    ForgeError, Result,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Feedback sample forwarded to the classifier's training endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingFeedback {
    pub task_description: String,
    pub task_type: TaskType,
    pub complexity: TaskComplexity,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    #[allow(dead_code)]
    status: String,
}

/// Resilient client for the external ML classifier service.
///
/// The classifier sits on the strategy-selection hot path, so the budget
/// is tight: 2 attempts, 50 ms base backoff, 100 ms per-call timeout.
/// Callers treat any failure as a signal to fall back to the heuristic.
pub struct ClassifierClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ClassifierClient {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ForgeError::Http)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
            retry: RetryPolicy::classifier(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        })
    }

    pub async fn classify(
        &self,
        description: &str,
        cancel: &CancellationFlag,
    ) -> Result<ClassificationResponse> {
        let request = ClassificationRequest {
            task_description: description.to_string(),
        };
        let response: ClassificationResponse = self.post_json("/classify/", &request, cancel).await?;
        debug!(
            task_type = %response.task_type,
            complexity = %response.complexity,
            confidence = response.confidence,
            "Classifier responded"
        );
        Ok(response)
    }

    pub async fn send_training_feedback(
        &self,
        feedback: &TrainingFeedback,
        cancel: &CancellationFlag,
    ) -> Result<()> {
        let _: Acknowledged = self.post_json("/training/feedback", feedback, cancel).await?;
        Ok(())
    }

    pub async fn trigger_retrain(&self, cancel: &CancellationFlag) -> Result<()> {
        let _: Acknowledged = self
            .post_json("/training/retrain", &serde_json::json!({}), cancel)
            .await?;
        Ok(())
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

    /// Shared resilient POST: breaker gate, bounded retries with backoff,
    /// per-call timeout, §7 failure mapping.
    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationFlag,
    ) -> Result<R> {
        if !self.breaker.should_allow_request().await {
            return Err(ForgeError::ServiceUnavailable(
                "ML classifier circuit is open".to_string(),
            ));
        }

        let url = format!("{}{path}", self.base_url);
        let mut last_error = None;

        for attempt in 0..self.retry.attempts {
            if cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }

            let send = self.http.post(&url).json(body).send();
            let outcome = tokio::time::timeout(self.timeout, send).await;

            match outcome {
                Err(_) => {
                    last_error = Some(ForgeError::Timeout(format!(
                        "ML classifier call exceeded {}ms",
                        self.timeout.as_millis()
                    )));
                }
                Ok(Err(e)) => {
                    last_error = Some(ForgeError::Transport(format!("ML classifier: {e}")));
                }
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        self.breaker.record_success().await;
                        return response.json::<R>().await.map_err(|e| {
                            ForgeError::Transport(format!("malformed classifier body: {e}"))
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        // Caller bug, not an outage; do not retry or trip
                        // the breaker.
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
        warn!(error = %last_error, "ML classifier call failed after retries");
        match last_error {
            ForgeError::Timeout(m) => Err(ForgeError::Timeout(m)),
            ForgeError::Remote { status, body } => Err(ForgeError::Remote { status, body }),
            _ => Err(ForgeError::ServiceUnavailable(
                "ML classifier unreachable after retries".to_string(),
            )),
        }
    }
}
