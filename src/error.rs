use thiserror::Error;

/// Convenience type alias for Results with ForgeError
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Main error type for the orchestration core
///
/// Variants map onto the HTTP taxonomy at the API boundary: validation
/// failures become 400, missing entities 404, state-machine violations 409,
/// downstream outages 503, elapsed budgets 504, everything else 500.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Remote error: status {status}")]
    Remote { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Provider quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ForgeError {
    /// One-line rendering for log streams and execution error columns.
    /// Newlines are stripped so SSE line framing stays intact.
    pub fn one_line(&self) -> String {
        self.to_string().replace(['\n', '\r'], " ")
    }
}
