//! Resilient outbound clients for the core's external collaborators.
//!
//! Every client applies the same contract: bounded exponential-backoff
//! retry, a consecutive-failure circuit breaker, a per-call timeout, an
//! `is_available` health probe that never errors, and cooperative
//! cancellation. The parameters differ per dependency; the shape does not.

mod circuit_breaker;
mod classifier;
mod github;
mod retry;

pub use circuit_breaker::{BreakerMetrics, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use classifier::{ClassifierClient, TrainingFeedback};
pub use github::{CreatePullRequest, GitHubClient, PullRequestInfo};
pub use retry::RetryPolicy;
