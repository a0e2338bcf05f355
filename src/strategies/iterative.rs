use super::{
    compose_task_prompt, ChangeParser, ExecutionResult, ExecutionStrategy, TaskExecutionContext,
    CHANGE_FORMAT_INSTRUCTIONS,
};
use crate::{
    cancel::CancellationFlag,
    config::OrchestrationConfig,
    constants,
    llm::{ChatMessage, LlmClient, LlmRequest},
    models::{CodingTask, TaskComplexity},
    validation::CodeValidator,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are an expert software engineer working iteratively. Produce a \
complete, correct implementation; when given validation feedback, fix every reported problem.";

/// Bounded generate-validate-refine loop for Medium tasks.
///
/// Caps at `max_iterations` attempts and a wall-clock budget, feeding each
/// round's validation errors back into the next prompt. Tokens and cost
/// accumulate across every round whether or not it produced usable output.
pub struct IterativeStrategy {
    llm: Arc<dyn LlmClient>,
    parser: Arc<ChangeParser>,
    validator: CodeValidator,
    max_iterations: u32,
    wall_clock: Duration,
}

impl IterativeStrategy {
    pub fn new(llm: Arc<dyn LlmClient>, parser: Arc<ChangeParser>) -> Self {
        Self {
            llm,
            parser,
            validator: CodeValidator::new(),
            max_iterations: constants::ITERATIVE_MAX_ITERATIONS,
            wall_clock: Duration::from_secs(constants::ITERATIVE_TIMEOUT_SECS),
        }
    }

    pub fn with_limits(mut self, config: &OrchestrationConfig) -> Self {
        self.max_iterations = config.iterative_max_iterations;
        self.wall_clock = Duration::from_secs(config.iterative_timeout_secs);
        self
    }
}

#[async_trait]
impl ExecutionStrategy for IterativeStrategy {
    fn name(&self) -> &'static str {
        "Iterative"
    }

    fn supports_complexity(&self) -> TaskComplexity {
        TaskComplexity::Medium
    }

    async fn execute(
        &self,
        task: &CodingTask,
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> ExecutionResult {
        let started = Instant::now();
        let base_prompt = compose_task_prompt(task, ctx);
        let system = format!("{SYSTEM_PROMPT}\n\n{CHANGE_FORMAT_INSTRUCTIONS}");

        let mut result = ExecutionResult {
            success: false,
            changes: Vec::new(),
            total_tokens: 0,
            total_cost: 0.0,
            duration_ms: 0,
            iterations_used: 0,
            errors: Vec::new(),
        };
        let mut last_errors: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                result.errors.push("cancelled".to_string());
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
            if started.elapsed() >= self.wall_clock {
                warn!(task_id = %task.id, "Iterative execution timed out");
                result.errors.push(format!(
                    "timed out after {}s",
                    self.wall_clock.as_secs()
                ));
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }

            result.iterations_used = iteration;
            let mut prompt = base_prompt.clone();
            if iteration > 1 && !last_errors.is_empty() {
                prompt.push_str(
                    "\nYour previous attempt failed validation with these errors:\n",
                );
                for error in &last_errors {
                    prompt.push_str(&format!("- {error}\n"));
                }
                prompt.push_str("Fix every error and output the corrected files.\n");
            }

            let request = LlmRequest {
                model: ctx.model.clone(),
                messages: vec![
                    ChatMessage::system(system.clone()),
                    ChatMessage::user(prompt),
                ],
                temperature: constants::SINGLE_SHOT_TEMPERATURE,
                max_tokens: constants::SINGLE_SHOT_MAX_TOKENS,
            };

            let response = match self.llm.generate(request, cancel).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(task_id = %task.id, iteration, error = %e, "LLM call failed");
                    last_errors = vec![e.one_line()];
                    continue;
                }
            };
            result.total_tokens += response.tokens_used;
            result.total_cost += response.cost_usd;

            let changes = self
                .parser
                .parse_bounded(response.content, ctx.existing_paths())
                .await;
            if changes.is_empty() {
                debug!(task_id = %task.id, iteration, "No changes parsed, retrying");
                last_errors = vec!["No code changes could be parsed from the output".to_string()];
                continue;
            }

            let report = self.validator.validate(&changes);
            if report.success {
                info!(
                    task_id = %task.id,
                    iterations = iteration,
                    changes = changes.len(),
                    "Iterative execution succeeded"
                );
                result.success = true;
                result.changes = changes;
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }

            debug!(
                task_id = %task.id,
                iteration,
                errors = report.errors.len(),
                "Validation failed, feeding errors back"
            );
            last_errors = report.errors;
        }

        result.errors = last_errors;
        result
            .errors
            .push(format!("Max iterations ({}) reached", self.max_iterations));
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}
