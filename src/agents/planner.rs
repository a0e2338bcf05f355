use super::extract_json;
use crate::{
    cancel::CancellationFlag,
    constants,
    llm::{ChatMessage, LlmClient, LlmRequest},
    models::{AgentResult, CodingTask, TaskPlan},
    strategies::TaskExecutionContext,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const AGENT_NAME: &str = "planner";

const SYSTEM_PROMPT: &str = "You are a software planning agent. Break the given coding task into \
between 2 and 5 subtasks. Respond ONLY with a JSON object of the form:\n\
{\"subtasks\": [{\"id\": \"s1\", \"title\": \"...\", \"description\": \"...\", \
\"affected_files\": [\"path\"], \"estimated_complexity\": 1-10, \"depends_on\": [\"id\"]}], \
\"strategy\": \"one paragraph describing the implementation order\"}\n\
Dependencies must reference other subtask ids and must not form cycles.";

/// Decomposes a task into an executable plan of subtasks.
///
/// A planner failure fails the whole multi-agent run, so parse errors and
/// invalid dependency graphs are reported, never papered over.
pub struct PlannerAgent {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl PlannerAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            model: constants::PLANNER_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub async fn plan(
        &self,
        task: &CodingTask,
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> (Option<TaskPlan>, AgentResult) {
        let started = Instant::now();
        let file_list = ctx
            .files
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let user_prompt = format!(
            "Task: {}\n\nDescription: {}\n\nRepository files available: [{}]",
            task.title, task.description, file_list
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
                warn!(error = %e, "Planner LLM call failed");
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

        let Some(json) = extract_json(&response.content) else {
            result.errors.push("Planner produced no JSON plan".to_string());
            return (None, result);
        };

        let plan: TaskPlan = match serde_json::from_str(json) {
            Ok(plan) => plan,
            Err(e) => {
                result.errors.push(format!("Unparseable plan: {e}"));
                return (None, result);
            }
        };

        if plan.subtasks.is_empty() || plan.subtasks.len() > 5 {
            result
                .errors
                .push(format!("Plan has {} subtasks, expected 1-5", plan.subtasks.len()));
            return (None, result);
        }
        if let Err(e) = plan.validate() {
            result.errors.push(e);
            return (None, result);
        }

        info!(
            task_id = %task.id,
            subtasks = plan.subtasks.len(),
            "Planner produced a plan"
        );
        result.success = true;
        result.output = serde_json::to_value(&plan).ok();
        (Some(plan), result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlmClient;
    use crate::strategies::TaskExecutionContext;

    fn task() -> CodingTask {
        CodingTask::new("u1", "Add caching", "Add a cache layer to the data access path")
    }

    fn plan_json() -> String {
        serde_json::json!({
            "subtasks": [
                {"id": "s1", "title": "Cache module", "description": "add cache",
                 "affected_files": ["src/cache.rs"], "estimated_complexity": 4, "depends_on": []},
                {"id": "s2", "title": "Wire cache", "description": "use cache",
                 "affected_files": ["src/db.rs"], "estimated_complexity": 5, "depends_on": ["s1"]}
            ],
            "strategy": "cache first, then integration"
        })
        .to_string()
    }

    #[tokio::test]
    async fn parses_a_valid_plan() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(format!("Here you go:\n```json\n{}\n```", plan_json()), 120, 0.01);

        let planner = PlannerAgent::new(llm);
        let (plan, result) = planner
            .plan(&task(), &TaskExecutionContext::empty("gpt-4o"), &CancellationFlag::new())
            .await;

        let plan = plan.unwrap();
        assert_eq!(plan.subtasks.len(), 2);
        assert!(result.success);
        assert_eq!(result.tokens_used, 120);
        assert!(result.output.is_some());
    }

    #[tokio::test]
    async fn cyclic_plan_is_rejected() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text(
            serde_json::json!({
                "subtasks": [
                    {"id": "a", "title": "A", "description": "", "depends_on": ["b"]},
                    {"id": "b", "title": "B", "description": "", "depends_on": ["a"]}
                ],
                "strategy": ""
            })
            .to_string(),
            50,
            0.005,
        );

        let planner = PlannerAgent::new(llm);
        let (plan, result) = planner
            .plan(&task(), &TaskExecutionContext::empty("gpt-4o"), &CancellationFlag::new())
            .await;

        assert!(plan.is_none());
        assert!(!result.success);
        assert!(result.errors[0].contains("cycle"));
        // Tokens still count toward the run even though planning failed.
        assert_eq!(result.tokens_used, 50);
    }

    #[tokio::test]
    async fn llm_failure_fails_the_planner() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_failure("provider down");

        let planner = PlannerAgent::new(llm);
        let (plan, result) = planner
            .plan(&task(), &TaskExecutionContext::empty("gpt-4o"), &CancellationFlag::new())
            .await;

        assert!(plan.is_none());
        assert!(!result.success);
    }
}
