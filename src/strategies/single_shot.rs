use super::{
    compose_task_prompt, ChangeParser, ExecutionResult, ExecutionStrategy, TaskExecutionContext,
    CHANGE_FORMAT_INSTRUCTIONS,
};
use crate::{
    cancel::CancellationFlag,
    constants,
    llm::{ChatMessage, LlmClient, LlmRequest},
    models::{CodingTask, TaskComplexity},
    validation::CodeValidator,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are an expert software engineer. Implement the requested change \
completely and correctly in one pass.";

/// One LLM call, validator-gated, no retry. The strategy for tasks the
/// selector judged Simple; runs on the cheap model tier.
pub struct SingleShotStrategy {
    llm: Arc<dyn LlmClient>,
    parser: Arc<ChangeParser>,
    validator: CodeValidator,
}

impl SingleShotStrategy {
    pub fn new(llm: Arc<dyn LlmClient>, parser: Arc<ChangeParser>) -> Self {
        Self {
            llm,
            parser,
            validator: CodeValidator::new(),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for SingleShotStrategy {
    fn name(&self) -> &'static str {
        "SingleShot"
    }

    fn supports_complexity(&self) -> TaskComplexity {
        TaskComplexity::Simple
    }

    async fn execute(
        &self,
        task: &CodingTask,
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> ExecutionResult {
        let started = Instant::now();
        debug!(task_id = %task.id, model = %ctx.model, "Single-shot execution starting");

        let system = format!("{SYSTEM_PROMPT}\n\n{CHANGE_FORMAT_INSTRUCTIONS}");
        let request = LlmRequest {
            model: ctx.model.clone(),
            messages: vec![
                ChatMessage::system(system),
                ChatMessage::user(compose_task_prompt(task, ctx)),
            ],
            temperature: constants::SINGLE_SHOT_TEMPERATURE,
            max_tokens: constants::SINGLE_SHOT_MAX_TOKENS,
        };

        let response = match self.llm.generate(request, cancel).await {
            Ok(response) => response,
            Err(e) => {
                let mut result = ExecutionResult::failure(vec![e.one_line()]);
                result.duration_ms = started.elapsed().as_millis() as u64;
                result.iterations_used = 1;
                return result;
            }
        };

        let changes = self
            .parser
            .parse_bounded(response.content, ctx.existing_paths())
            .await;

        let mut result = ExecutionResult {
            success: false,
            changes: Vec::new(),
            total_tokens: response.tokens_used,
            total_cost: response.cost_usd,
            duration_ms: 0,
            iterations_used: 1,
            errors: Vec::new(),
        };

        let report = self.validator.validate(&changes);
        if report.success {
            info!(task_id = %task.id, changes = changes.len(), "Single-shot execution succeeded");
            result.success = true;
            result.changes = changes;
        } else {
            result.errors = report.errors;
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlmClient;

    fn strategy(llm: Arc<ScriptedLlmClient>) -> SingleShotStrategy {
        SingleShotStrategy::new(llm, Arc::new(ChangeParser::new()))
    }

    #[tokio::test]
    async fn valid_output_succeeds_in_one_iteration() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("FILE: README.md\n```markdown\n# Fixed typo\n```\n", 150, 0.001);

        let task = CodingTask::new("u1", "Fix typo in README", "Quick fix for typo");
        let result = strategy(llm)
            .execute(
                &task,
                &TaskExecutionContext::empty("gpt-4o-mini"),
                &CancellationFlag::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.iterations_used, 1);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.total_tokens, 150);
        assert!(result.total_cost > 0.0);
    }

    #[tokio::test]
    async fn validation_failure_fails_without_retry() {
        let llm = Arc::new(ScriptedLlmClient::new());
        // Unbalanced brace in a rust file fails validation.
        llm.push_text("FILE: src/a.rs\n```rust\nfn a() {\n```\n", 90, 0.001);

        let task = CodingTask::new("u1", "t", "d");
        let strategy = strategy(Arc::clone(&llm));
        let result = strategy
            .execute(
                &task,
                &TaskExecutionContext::empty("gpt-4o-mini"),
                &CancellationFlag::new(),
            )
            .await;

        assert!(!result.success);
        assert!(!result.errors.is_empty());
        // No retry inside the strategy: exactly one LLM call.
        assert_eq!(llm.request_count(), 1);
        assert_eq!(result.total_tokens, 90);
    }

    #[tokio::test]
    async fn provider_failure_is_folded_into_the_result() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_failure("provider offline");

        let task = CodingTask::new("u1", "t", "d");
        let result = strategy(llm)
            .execute(
                &task,
                &TaskExecutionContext::empty("gpt-4o-mini"),
                &CancellationFlag::new(),
            )
            .await;

        assert!(!result.success);
        assert!(result.errors[0].contains("provider offline"));
    }

    #[test]
    fn advertises_simple_complexity() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let strategy = strategy(llm);
        assert_eq!(strategy.name(), "SingleShot");
        assert_eq!(strategy.supports_complexity(), TaskComplexity::Simple);
    }
}
