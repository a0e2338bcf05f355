use super::render_changes;
use crate::{
    cancel::CancellationFlag,
    constants,
    llm::{ChatMessage, LlmClient, LlmRequest},
    models::{AgentResult, CodeChange, CodingTask},
    strategies::{ChangeParser, TaskExecutionContext},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

const AGENT_NAME: &str = "tester";
const MAX_CHARS_PER_FILE: usize = 6000;

const SYSTEM_PROMPT: &str = "You are a test engineer. Write automated tests covering the change \
set below. For each test file respond with:\nFILE: <path>\n```<language>\n<full file \
content>\n```\nFollow the conventions visible in the changed code.";

/// Generates test files for a merged change set. Failures here are
/// non-fatal to the strategy; the caller logs and moves on.
pub struct TesterAgent {
    llm: Arc<dyn LlmClient>,
    parser: Arc<ChangeParser>,
    model: String,
}

impl TesterAgent {
    pub fn new(llm: Arc<dyn LlmClient>, parser: Arc<ChangeParser>) -> Self {
        Self {
            llm,
            parser,
            model: constants::TESTER_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub async fn write_tests(
        &self,
        task: &CodingTask,
        changes: &[CodeChange],
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> AgentResult {
        let started = Instant::now();
        let user_prompt = format!(
            "Task: {}\n\nChange set to cover:\n{}",
            task.title,
            render_changes(changes, MAX_CHARS_PER_FILE),
        );

        let request = LlmRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            temperature: constants::AGENT_TEMPERATURE,
            max_tokens: constants::AGENT_MAX_TOKENS,
        };

        let response = match self.llm.generate(request, cancel).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Tester LLM call failed");
                return AgentResult::failure(AGENT_NAME, e.one_line());
            }
        };

        let tests = self
            .parser
            .parse_bounded(response.content, ctx.existing_paths())
            .await;

        let mut errors = Vec::new();
        if tests.is_empty() {
            errors.push("Tester produced no test files".to_string());
        }

        AgentResult {
            agent: AGENT_NAME.to_string(),
            success: errors.is_empty(),
            changes: tests,
            tokens_used: response.tokens_used,
            cost_usd: response.cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            output: None,
            errors,
        }
    }
}
