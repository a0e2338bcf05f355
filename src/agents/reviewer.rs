use super::{extract_json, render_changes};
use crate::{
    cancel::CancellationFlag,
    constants,
    llm::{ChatMessage, LlmClient, LlmRequest},
    models::{AgentResult, CodeChange, CodingTask, ReviewResult},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const AGENT_NAME: &str = "reviewer";
const MAX_CHARS_PER_FILE: usize = 6000;

const SYSTEM_PROMPT: &str = "You are a strict code reviewer. Review the merged change set for \
correctness, consistency and obvious defects. Respond ONLY with a JSON object:\n\
{\"approved\": true|false, \"issues\": [\"...\"], \"severity\": 1-5}\n\
severity 1 means cosmetic, 5 means blocking.";

/// Reviews a merged change set; an unparseable review fails closed.
pub struct ReviewerAgent {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl ReviewerAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            model: constants::REVIEWER_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub async fn review(
        &self,
        task: &CodingTask,
        changes: &[CodeChange],
        cancel: &CancellationFlag,
    ) -> (Option<ReviewResult>, AgentResult) {
        let started = Instant::now();
        let user_prompt = format!(
            "Task: {}\n\nDescription: {}\n\nChange set:\n{}",
            task.title,
            task.description,
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
                warn!(error = %e, "Reviewer LLM call failed");
                return (None, AgentResult::failure(AGENT_NAME, e.one_line()));
            }
        };

        let mut result = AgentResult {
            agent: AGENT_NAME.to_string(),
            success: false,
            changes: Vec::new(),
            tokens_used: response.tokens_used,
            cost_usd: response.cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            output: None,
            errors: Vec::new(),
        };

        let review: ReviewResult = match extract_json(&response.content)
            .and_then(|json| serde_json::from_str(json).ok())
        {
            Some(review) => review,
            None => {
                result
                    .errors
                    .push("Reviewer produced no parseable verdict".to_string());
                return (None, result);
            }
        };

        info!(
            task_id = %task.id,
            approved = review.approved,
            issues = review.issues.len(),
            severity = review.severity,
            "Review finished"
        );
        result.success = true;
        result.output = serde_json::to_value(&review).ok();
        (Some(review), result)
    }
}
