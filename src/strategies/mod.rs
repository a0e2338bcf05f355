//! Execution strategy family: SingleShot, Iterative and MultiAgent.
//!
//! Strategies never return `Err` from `execute`; every failure mode is
//! folded into the returned [`ExecutionResult`] so the coordinator has one
//! path for persistence and event emission.

mod iterative;
mod multi_agent;
mod parser;
mod single_shot;

pub use iterative::IterativeStrategy;
pub use multi_agent::MultiAgentStrategy;
pub use parser::{language_from_extension, ChangeParser};
pub use single_shot::SingleShotStrategy;

use crate::{
    cancel::CancellationFlag,
    models::{CodeChange, CodingTask, TaskComplexity},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Closed set of strategies the selector can route to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StrategyKind {
    SingleShot,
    Iterative,
    MultiAgent,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::SingleShot => "SingleShot",
            StrategyKind::Iterative => "Iterative",
            StrategyKind::MultiAgent => "MultiAgent",
        };
        f.write_str(s)
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "singleshot" => Ok(StrategyKind::SingleShot),
            "iterative" => Ok(StrategyKind::Iterative),
            "multiagent" => Ok(StrategyKind::MultiAgent),
            _ => Err(format!("Unknown strategy: {s}")),
        }
    }
}

/// One file of repository context handed to a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: String,
    pub language: String,
    pub content: String,
}

/// Context the coordinator loads before invoking a strategy: the relevant
/// file set plus the model the run was routed to.
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    pub model: String,
    pub files: Vec<ContextFile>,
}

impl TaskExecutionContext {
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            files: Vec::new(),
        }
    }

    pub fn existing_paths(&self) -> HashSet<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Renders the file set as FILE blocks for prompt composition.
    pub fn render_files(&self) -> String {
        let mut rendered = String::new();
        for file in &self.files {
            rendered.push_str(&format!(
                "FILE: {}\n```{}\n{}\n```\n\n",
                file.path, file.language, file.content
            ));
        }
        rendered
    }
}

/// Outcome of one strategy run. Token and cost totals accumulate across
/// every LLM call made during the run, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub changes: Vec<CodeChange>,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub duration_ms: u64,
    pub iterations_used: u32,
    pub errors: Vec<String>,
}

impl ExecutionResult {
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            changes: Vec::new(),
            total_tokens: 0,
            total_cost: 0.0,
            duration_ms: 0,
            iterations_used: 0,
            errors,
        }
    }
}

/// Uniform contract every strategy implements.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports_complexity(&self) -> TaskComplexity;

    async fn execute(
        &self,
        task: &CodingTask,
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> ExecutionResult;
}

/// The closed strategy registry handed to the coordinator.
pub struct StrategySet {
    single_shot: Arc<dyn ExecutionStrategy>,
    iterative: Arc<dyn ExecutionStrategy>,
    multi_agent: Arc<dyn ExecutionStrategy>,
}

impl StrategySet {
    pub fn new(
        single_shot: Arc<dyn ExecutionStrategy>,
        iterative: Arc<dyn ExecutionStrategy>,
        multi_agent: Arc<dyn ExecutionStrategy>,
    ) -> Self {
        Self {
            single_shot,
            iterative,
            multi_agent,
        }
    }

    pub fn for_kind(&self, kind: StrategyKind) -> Arc<dyn ExecutionStrategy> {
        match kind {
            StrategyKind::SingleShot => Arc::clone(&self.single_shot),
            StrategyKind::Iterative => Arc::clone(&self.iterative),
            StrategyKind::MultiAgent => Arc::clone(&self.multi_agent),
        }
    }
}

/// Shared system prompt fragment describing the change output grammar.
pub(crate) const CHANGE_FORMAT_INSTRUCTIONS: &str = "For every file you create or modify, output \
the complete new file content in this exact format:\nFILE: <path>\n```<language>\n<full file \
content>\n```\nDo not output diffs or partial files.";

/// User-prompt body shared by the single-shot and iterative strategies.
pub(crate) fn compose_task_prompt(task: &CodingTask, ctx: &TaskExecutionContext) -> String {
    let mut prompt = format!("Task: {}\n\nDescription: {}\n", task.title, task.description);
    if let Some(task_type) = task.task_type {
        prompt.push_str(&format!("Type: {task_type}\n"));
    }
    let files = ctx.render_files();
    if !files.is_empty() {
        prompt.push_str("\nRelevant files:\n");
        prompt.push_str(&files);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_parse_case_insensitively() {
        for raw in ["SingleShot", "singleshot", "single_shot", "single-shot"] {
            assert_eq!(raw.parse::<StrategyKind>().unwrap(), StrategyKind::SingleShot);
        }
        assert_eq!(
            "MultiAgent".parse::<StrategyKind>().unwrap(),
            StrategyKind::MultiAgent
        );
        assert!("Magic".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn context_tracks_existing_paths() {
        let ctx = TaskExecutionContext {
            model: "m".into(),
            files: vec![ContextFile {
                path: "src/a.rs".into(),
                language: "rust".into(),
                content: "fn a() {}".into(),
            }],
        };
        assert!(ctx.existing_paths().contains("src/a.rs"));
        assert!(ctx.render_files().contains("FILE: src/a.rs"));
    }
}
