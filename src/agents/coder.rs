use crate::{
    cancel::CancellationFlag,
    constants,
    llm::{ChatMessage, LlmClient, LlmRequest},
    models::{AgentResult, CodingTask, SubTask},
    strategies::{ChangeParser, TaskExecutionContext},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const AGENT_NAME: &str = "coder";

const SYSTEM_PROMPT: &str = "You are an expert software engineer implementing one subtask of a \
larger plan. Produce complete file contents for every file you touch. For each file respond \
with:\nFILE: <path>\n```<language>\n<full file content>\n```\nDo not include commentary outside \
the FILE blocks.";

/// Implements a single planner subtask as a set of code changes.
pub struct CoderAgent {
    llm: Arc<dyn LlmClient>,
    parser: Arc<ChangeParser>,
}

impl CoderAgent {
    pub fn new(llm: Arc<dyn LlmClient>, parser: Arc<ChangeParser>) -> Self {
        Self { llm, parser }
    }

    pub async fn implement(
        &self,
        task: &CodingTask,
        subtask: &SubTask,
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> AgentResult {
        let started = Instant::now();
        let agent = format!("{AGENT_NAME}:{}", subtask.id);

        let mut user_prompt = format!(
            "Overall task: {}\n\nSubtask: {}\n{}\n\nFiles expected to change: {}\n",
            task.title,
            subtask.title,
            subtask.description,
            subtask.affected_files.join(", "),
        );
        let context_section = ctx.render_files();
        if !context_section.is_empty() {
            user_prompt.push_str("\nCurrent file contents:\n");
            user_prompt.push_str(&context_section);
        }

        let request = LlmRequest {
            model: ctx.model.clone(),
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
                warn!(subtask = %subtask.id, error = %e, "Coder LLM call failed");
                return AgentResult::failure(agent, e.one_line());
            }
        };

        let changes = self
            .parser
            .parse_bounded(response.content, ctx.existing_paths())
            .await;
        debug!(subtask = %subtask.id, changes = changes.len(), "Coder finished");

        let mut errors = Vec::new();
        if changes.is_empty() {
            errors.push(format!("Coder produced no changes for subtask {}", subtask.id));
        }

        AgentResult {
            agent,
            success: errors.is_empty(),
            changes,
            tokens_used: response.tokens_used,
            cost_usd: response.cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            output: None,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlmClient;

    fn subtask() -> SubTask {
        SubTask {
            id: "s1".into(),
            title: "Add helper".into(),
            description: "Add a helper function".into(),
            affected_files: vec!["src/helper.rs".into()],
            estimated_complexity: 3,
            depends_on: vec![],
        }
    }

    #[tokio::test]
    async fn coder_parses_changes_from_file_blocks() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(
            "FILE: src/helper.rs\n```rust\npub fn helper() -> u32 { 7 }\n```\n",
            80,
            0.002,
        );

        let coder = CoderAgent::new(llm, Arc::new(ChangeParser::new()));
        let task = CodingTask::new("u1", "t", "d");
        let result = coder
            .implement(
                &task,
                &subtask(),
                &TaskExecutionContext::empty("gpt-4o-mini"),
                &CancellationFlag::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].path, "src/helper.rs");
        assert_eq!(result.agent, "coder:s1");
    }

    #[tokio::test]
    async fn empty_output_is_a_coder_failure() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("I could not figure this out, sorry.", 40, 0.001);

        let coder = CoderAgent::new(llm, Arc::new(ChangeParser::new()));
        let task = CodingTask::new("u1", "t", "d");
        let result = coder
            .implement(
                &task,
                &subtask(),
                &TaskExecutionContext::empty("gpt-4o-mini"),
                &CancellationFlag::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.tokens_used, 40);
    }
}
