use super::{ExecutionResult, ExecutionStrategy, TaskExecutionContext};
use crate::{
    agents::{CoderAgent, PlannerAgent, ReviewerAgent, TesterAgent},
    cancel::CancellationFlag,
    models::{AgentResult, CodeChange, CodingTask, SubTask, TaskComplexity},
    validation::CodeValidator,
};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Planner → parallel Coders → Reviewer → Validator → Tester pipeline for
/// Complex tasks.
///
/// Subtasks become eligible once their dependencies complete; within an
/// eligibility wave coders run concurrently, bounded by a semaphore.
/// Conflicting edits to one path resolve last-write-wins in completion
/// order, each resolution logged. The tester is best-effort; everything
/// before it is a gate.
pub struct MultiAgentStrategy {
    planner: PlannerAgent,
    coder: CoderAgent,
    reviewer: ReviewerAgent,
    tester: TesterAgent,
    validator: CodeValidator,
    max_parallel_coders: usize,
}

impl MultiAgentStrategy {
    pub fn new(
        planner: PlannerAgent,
        coder: CoderAgent,
        reviewer: ReviewerAgent,
        tester: TesterAgent,
        max_parallel_coders: usize,
    ) -> Self {
        Self {
            planner,
            coder,
            reviewer,
            tester,
            validator: CodeValidator::new(),
            max_parallel_coders: max_parallel_coders.max(1),
        }
    }

    /// Runs every eligible wave of subtasks; returns coder results in
    /// completion order.
    async fn run_coders(
        &self,
        task: &CodingTask,
        subtasks: &[SubTask],
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> Vec<AgentResult> {
        let semaphore = tokio::sync::Semaphore::new(self.max_parallel_coders);
        let mut completed: HashSet<String> = HashSet::new();
        let mut remaining: Vec<&SubTask> = subtasks.iter().collect();
        let mut results = Vec::new();

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                break;
            }

            let (eligible, blocked): (Vec<&SubTask>, Vec<&SubTask>) = remaining
                .into_iter()
                .partition(|s| s.depends_on.iter().all(|d| completed.contains(d)));
            remaining = blocked;

            // Plans are validated acyclic up front, so an empty wave with
            // work left means a dependency failed to complete.
            if eligible.is_empty() {
                warn!(task_id = %task.id, "No eligible subtasks remain, stopping coders");
                break;
            }

            let mut wave = FuturesUnordered::new();
            for subtask in eligible {
                let semaphore = &semaphore;
                let coder = &self.coder;
                wave.push(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let result = coder.implement(task, subtask, ctx, cancel).await;
                    (subtask.id.clone(), result)
                });
            }

            // FuturesUnordered yields in completion order, which is the
            // order conflict resolution honors.
            while let Some((subtask_id, result)) = wave.next().await {
                completed.insert(subtask_id);
                results.push(result);
            }
        }

        results
    }

    /// Last-write-wins merge per file path, in completion order.
    fn merge_changes(task: &CodingTask, coder_results: &[AgentResult]) -> Vec<CodeChange> {
        let mut merged: HashMap<String, CodeChange> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for result in coder_results {
            for change in &result.changes {
                if let Some(previous) = merged.insert(change.path.clone(), change.clone()) {
                    info!(
                        task_id = %task.id,
                        path = %previous.path,
                        winner = %result.agent,
                        "Conflict resolved: later subtask overwrote file"
                    );
                } else {
                    order.push(change.path.clone());
                }
            }
        }

        order
            .into_iter()
            .filter_map(|path| merged.remove(&path))
            .collect()
    }
}

#[async_trait]
impl ExecutionStrategy for MultiAgentStrategy {
    fn name(&self) -> &'static str {
        "MultiAgent"
    }

    fn supports_complexity(&self) -> TaskComplexity {
        TaskComplexity::Complex
    }

    async fn execute(
        &self,
        task: &CodingTask,
        ctx: &TaskExecutionContext,
        cancel: &CancellationFlag,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult {
            success: false,
            changes: Vec::new(),
            total_tokens: 0,
            total_cost: 0.0,
            duration_ms: 0,
            iterations_used: 1,
            errors: Vec::new(),
        };
        let absorb = |result: &mut ExecutionResult, agent: &AgentResult| {
            result.total_tokens += agent.tokens_used;
            result.total_cost += agent.cost_usd;
        };

        // Stage 1: plan. A planner failure fails the whole run.
        let (plan, planner_result) = self.planner.plan(task, ctx, cancel).await;
        absorb(&mut result, &planner_result);
        let Some(plan) = plan else {
            result.errors = planner_result.errors;
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        };
        debug!(task_id = %task.id, subtasks = plan.subtasks.len(), "Plan accepted");

        if cancel.is_cancelled() {
            result.errors.push("cancelled".to_string());
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        // Stage 2: coders in dependency waves.
        let coder_results = self.run_coders(task, &plan.subtasks, ctx, cancel).await;
        for coder_result in &coder_results {
            absorb(&mut result, coder_result);
        }
        if cancel.is_cancelled() {
            result.errors.push("cancelled".to_string());
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }
        let failed_coders: Vec<&AgentResult> =
            coder_results.iter().filter(|r| !r.success).collect();
        if !failed_coders.is_empty() || coder_results.len() != plan.subtasks.len() {
            for failed in failed_coders {
                result.errors.extend(failed.errors.iter().cloned());
            }
            if coder_results.len() != plan.subtasks.len() {
                result
                    .errors
                    .push("Not every subtask produced a coder result".to_string());
            }
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        // Stage 3: conflict resolution.
        let merged = Self::merge_changes(task, &coder_results);

        // Stage 4: review gate.
        let (review, reviewer_result) = self.reviewer.review(task, &merged, cancel).await;
        absorb(&mut result, &reviewer_result);
        match review {
            Some(review) if review.approved => {}
            Some(review) => {
                result.errors = if review.issues.is_empty() {
                    vec!["Reviewer rejected the change set".to_string()]
                } else {
                    review.issues
                };
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
            None => {
                result.errors = reviewer_result.errors;
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        }

        if cancel.is_cancelled() {
            result.errors.push("cancelled".to_string());
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        // Stage 5: validator gate.
        let report = self.validator.validate(&merged);
        if !report.success {
            result.errors = report.errors;
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        // Stage 6: tester, best-effort.
        let mut changes = merged;
        let tester_result = self.tester.write_tests(task, &changes, ctx, cancel).await;
        absorb(&mut result, &tester_result);
        if tester_result.success {
            changes.extend(tester_result.changes);
        } else {
            warn!(
                task_id = %task.id,
                errors = ?tester_result.errors,
                "Tester failed, shipping changes without generated tests"
            );
        }

        info!(
            task_id = %task.id,
            changes = changes.len(),
            tokens = result.total_tokens,
            "Multi-agent execution succeeded"
        );
        result.success = true;
        result.changes = changes;
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}
