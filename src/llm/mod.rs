//! LLM provider client: single-shot request/response contract
//!
//! The core never streams from providers; a request goes out, a response
//! with token and cost accounting comes back. Cost computation belongs to
//! the provider client, the core does not recompute it.

mod http_client;

pub use http_client::HttpLlmClient;

#[cfg(test)]
pub mod testing;

use crate::{cancel::CancellationFlag, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    /// Model the provider actually resolved the request to
    pub model: String,
}

/// Single-shot generation contract to an LLM provider.
///
/// Fails with `ServiceUnavailable` on transport errors, `QuotaExhausted`
/// on provider rate limits, and `InvalidRequest` on malformed input.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: LlmRequest, cancel: &CancellationFlag)
        -> Result<LlmResponse>;
}
