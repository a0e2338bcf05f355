use super::{ChatMessage, LlmClient, LlmRequest, LlmResponse};
use crate::{cancel::CancellationFlag, config::LlmConfig, ForgeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-1K-token pricing for the models the registry ships by default.
/// (input, output) USD; unknown models fall back to the flat rate.
const MODEL_PRICES_PER_1K: &[(&str, f64, f64)] = &[
    ("gpt-4o", 0.0025, 0.01),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-4-turbo", 0.01, 0.03),
    ("claude-3-5-sonnet", 0.003, 0.015),
    ("claude-3-haiku", 0.00025, 0.00125),
];
const FALLBACK_PRICE_PER_1K: f64 = 0.002;

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ForgeError::Http)?;
        Ok(Self { http, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn cost_for(model: &str, usage: &WireUsage) -> f64 {
        for (name, input_price, output_price) in MODEL_PRICES_PER_1K {
            if model.starts_with(name) {
                return usage.prompt_tokens as f64 / 1000.0 * input_price
                    + usage.completion_tokens as f64 / 1000.0 * output_price;
            }
        }
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        total as f64 / 1000.0 * FALLBACK_PRICE_PER_1K
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(
        &self,
        request: LlmRequest,
        cancel: &CancellationFlag,
    ) -> Result<LlmResponse> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        if request.model.is_empty() {
            return Err(ForgeError::InvalidRequest("model name is empty".into()));
        }
        if request.messages.is_empty() {
            return Err(ForgeError::InvalidRequest("no messages in request".into()));
        }

        let wire = WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(model = %request.model, "Sending LLM generation request");
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| ForgeError::ServiceUnavailable(format!("LLM provider: {e}")))?;

        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }

        let status = response.status();
        if status.as_u16() == 429 {
            warn!(model = %request.model, "LLM provider rate limited the request");
            return Err(ForgeError::QuotaExhausted(format!(
                "provider returned 429 for {}",
                request.model
            )));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::InvalidRequest(format!(
                "provider rejected request ({status}): {body}"
            )));
        }
        if !status.is_success() {
            return Err(ForgeError::ServiceUnavailable(format!(
                "provider returned {status}"
            )));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::ServiceUnavailable(format!("malformed provider body: {e}")))?;

        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ForgeError::ServiceUnavailable("provider returned no choices".into()))?;

        let tokens_used = if wire.usage.total_tokens > 0 {
            wire.usage.total_tokens
        } else {
            wire.usage.prompt_tokens + wire.usage.completion_tokens
        };

        Ok(LlmResponse {
            cost_usd: Self::cost_for(&wire.model, &wire.usage),
            tokens_used,
            model: wire.model,
            content,
        })
    }
}
