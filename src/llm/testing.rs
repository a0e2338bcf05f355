//! Scripted LLM client for strategy and coordinator tests.

use super::{LlmClient, LlmRequest, LlmResponse};
use crate::{cancel::CancellationFlag, ForgeError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

enum Scripted {
    Text { content: String, tokens: u64, cost: f64 },
    Failure(String),
}

/// Returns canned responses in order and records every request it saw.
/// When the script runs dry it keeps replaying the last text response,
/// so open-ended loops still terminate deterministically.
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<LlmRequest>>,
    last_text: Mutex<Option<(String, u64, f64)>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, content: impl Into<String>, tokens: u64, cost: f64) {
        self.script.lock().unwrap().push_back(Scripted::Text {
            content: content.into(),
            tokens,
            cost,
        });
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(message.into()));
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(
        &self,
        request: LlmRequest,
        cancel: &CancellationFlag,
    ) -> Result<LlmResponse> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Text { content, tokens, cost }) => {
                *self.last_text.lock().unwrap() = Some((content.clone(), tokens, cost));
                Ok(LlmResponse {
                    content,
                    tokens_used: tokens,
                    cost_usd: cost,
                    model,
                })
            }
            Some(Scripted::Failure(message)) => Err(ForgeError::ServiceUnavailable(message)),
            None => {
                let last = self.last_text.lock().unwrap().clone();
                match last {
                    Some((content, tokens, cost)) => Ok(LlmResponse {
                        content,
                        tokens_used: tokens,
                        cost_usd: cost,
                        model,
                    }),
                    None => Err(ForgeError::ServiceUnavailable(
                        "scripted client has no responses".into(),
                    )),
                }
            }
        }
    }
}
