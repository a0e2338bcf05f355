//! Execution coordinator: queues an execution, runs the strategy in a
//! detached background task, persists the outcome and streams logs.

use crate::{
    abtest::AbTestEngine,
    cancel::CancellationFlag,
    feedback::FeedbackService,
    logstream::ExecutionLogService,
    models::{ABTestResult, CodingTask, TaskComplexity, TaskExecution, TaskType},
    performance::{ModelExecutionRecord, PerformanceTracker},
    selection::{ModelSelector, StrategySelector},
    store::ExecutionRepository,
    strategies::{ExecutionResult, StrategySet, TaskExecutionContext},
    tasks::TaskService,
    Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Loads the file context a strategy sees. The default implementation
/// hands strategies an empty workspace; deployments plug in a loader
/// backed by their checkout/workspace layer.
#[async_trait]
pub trait ContextLoader: Send + Sync {
    async fn load(&self, task: &CodingTask, model: &str) -> Result<TaskExecutionContext>;
}

pub struct EmptyContextLoader;

#[async_trait]
impl ContextLoader for EmptyContextLoader {
    async fn load(&self, _task: &CodingTask, model: &str) -> Result<TaskExecutionContext> {
        Ok(TaskExecutionContext::empty(model))
    }
}

/// Owns the background execution lifecycle. The HTTP handler only ever
/// calls `queue_execution`; everything after the spawn runs in the
/// worker's own scope with its own cancellation flag, never the request's.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    tasks: Arc<TaskService>,
    executions: Arc<dyn ExecutionRepository>,
    strategy_selector: Arc<StrategySelector>,
    model_selector: Arc<ModelSelector>,
    strategies: Arc<StrategySet>,
    logs: Arc<ExecutionLogService>,
    tracker: Arc<PerformanceTracker>,
    ab_engine: Arc<AbTestEngine>,
    feedback: Arc<FeedbackService>,
    context_loader: Arc<dyn ContextLoader>,
    running: Arc<Mutex<HashMap<Uuid, (Uuid, CancellationFlag)>>>,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<TaskService>,
        executions: Arc<dyn ExecutionRepository>,
        strategy_selector: Arc<StrategySelector>,
        model_selector: Arc<ModelSelector>,
        strategies: Arc<StrategySet>,
        logs: Arc<ExecutionLogService>,
        tracker: Arc<PerformanceTracker>,
        ab_engine: Arc<AbTestEngine>,
        feedback: Arc<FeedbackService>,
        context_loader: Arc<dyn ContextLoader>,
    ) -> Self {
        Self {
            tasks,
            executions,
            strategy_selector,
            model_selector,
            strategies,
            logs,
            tracker,
            ab_engine,
            feedback,
            context_loader,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves strategy and model, starts the task, persists the
    /// execution row and spawns the detached worker. Returns as soon as
    /// the execution is queued.
    pub async fn queue_execution(
        &self,
        task_id: Uuid,
        override_strategy: Option<&str>,
    ) -> Result<TaskExecution> {
        let task = self.tasks.get(task_id).await?;
        let cancel = CancellationFlag::new();

        let decision = self
            .strategy_selector
            .select(&task, override_strategy, &cancel)
            .await;
        // Selection resolved a complexity; write it back while the task is
        // still classifiable (idempotent otherwise).
        let task = self
            .tasks
            .classify(task_id, Some(decision.task_type), decision.complexity)
            .await?;

        let selection = self
            .model_selector
            .select_best_model(
                &task.description,
                decision.task_type,
                decision.complexity,
                &task_id.to_string(),
            )
            .await;

        let execution =
            TaskExecution::new(task_id, decision.kind.to_string(), selection.model.clone());
        self.executions.insert(execution.clone()).await?;
        self.tasks.start(task_id, &execution).await?;

        {
            let mut running = self.running.lock().await;
            running.insert(execution.id, (task_id, cancel.clone()));
        }

        let coordinator = self.clone();
        let worker_execution = execution.clone();
        let ab_test_id = selection.ab_test_id;
        let task_type = decision.task_type;
        let complexity = decision.complexity;
        tokio::spawn(async move {
            coordinator
                .run_execution(worker_execution, task_type, complexity, ab_test_id, cancel)
                .await;
        });

        info!(
            task_id = %task_id,
            execution_id = %execution.id,
            strategy = %execution.strategy,
            model = %execution.model,
            "Execution queued"
        );
        Ok(execution)
    }

    /// Cancels any running execution of the given task.
    pub async fn cancel_for_task(&self, task_id: Uuid) {
        let running = self.running.lock().await;
        for (execution_id, (owner, cancel)) in running.iter() {
            if *owner == task_id {
                warn!(execution_id = %execution_id, "Cancelling running execution");
                cancel.cancel();
            }
        }
    }

    /// Cancels every running execution; used at shutdown.
    pub async fn cancel_all(&self) {
        let running = self.running.lock().await;
        for (_, (_, cancel)) in running.iter() {
            cancel.cancel();
        }
    }

    async fn run_execution(
        self,
        mut execution: TaskExecution,
        task_type: TaskType,
        complexity: TaskComplexity,
        ab_test_id: Option<Uuid>,
        cancel: CancellationFlag,
    ) {
        let execution_id = execution.id;
        self.logs
            .write(
                execution_id,
                format!("status:starting strategy={}", execution.strategy),
            )
            .await;

        let result = self.drive_strategy(&execution, &cancel).await;

        // Persist the outcome and transition the task; failures here are
        // logged best-effort, the stream still completes.
        execution.finished_at = Some(chrono::Utc::now());
        execution.success = result.success;
        execution.tokens_used = result.total_tokens;
        execution.cost_usd = result.total_cost;
        execution.duration_ms = result.duration_ms;
        execution.error = if result.errors.is_empty() {
            None
        } else {
            Some(result.errors.join("; "))
        };
        if let Err(e) = self.executions.update(&execution).await {
            error!(execution_id = %execution_id, error = %e, "Failed to persist execution");
        }

        if result.success {
            if let Err(e) = self
                .tasks
                .complete(execution.task_id, &execution, !result.changes.is_empty())
                .await
            {
                error!(execution_id = %execution_id, error = %e, "Failed to complete task");
            }
            self.logs
                .write(
                    execution_id,
                    format!(
                        "status:success tokens={} cost={:.6} durationMs={}",
                        result.total_tokens, result.total_cost, result.duration_ms
                    ),
                )
                .await;
        } else {
            if let Err(e) = self.tasks.fail(execution.task_id, &execution).await {
                error!(execution_id = %execution_id, error = %e, "Failed to mark task failed");
            }
            let one_line = result.errors.join("; ").replace(['\n', '\r'], " ");
            self.logs
                .write(execution_id, format!("status:failed error={one_line}"))
                .await;
        }

        self.tracker
            .record_execution(ModelExecutionRecord {
                model: execution.model.clone(),
                task_type,
                complexity,
                success: result.success,
                tokens: result.total_tokens,
                cost_usd: result.total_cost,
                duration_ms: result.duration_ms,
                quality: None,
            })
            .await;

        // Outcome observation: classifier training sample, best-effort.
        if let Ok(task) = self.tasks.get(execution.task_id).await {
            self.feedback
                .record_execution_outcome(&task.description, task_type, complexity, result.success)
                .await;
        }

        if let Some(test_id) = ab_test_id {
            let record = ABTestResult {
                request_id: execution.task_id.to_string(),
                variant: execution.model.clone(),
                success: result.success,
                duration_ms: result.duration_ms,
                tokens: result.total_tokens,
                cost_usd: result.total_cost,
                quality: None,
            };
            if let Err(e) = self.ab_engine.record_result(test_id, record).await {
                warn!(execution_id = %execution_id, error = %e, "Failed to record A/B result");
            }
        }

        self.logs.complete(execution_id).await;
        self.running.lock().await.remove(&execution_id);
    }

    /// Loads a fresh task view and context, then runs the strategy.
    /// Failures before the strategy starts are folded into a failed
    /// result so the caller has one completion path.
    async fn drive_strategy(
        &self,
        execution: &TaskExecution,
        cancel: &CancellationFlag,
    ) -> ExecutionResult {
        // Reload so the worker sees edits made after queueing.
        let task = match self.tasks.get(execution.task_id).await {
            Ok(task) => task,
            Err(e) => return ExecutionResult::failure(vec![e.one_line()]),
        };

        let ctx = match self.context_loader.load(&task, &execution.model).await {
            Ok(ctx) => ctx,
            Err(e) => {
                return ExecutionResult::failure(vec![format!(
                    "context loading failed: {}",
                    e.one_line()
                )])
            }
        };

        let kind = match execution.strategy.parse() {
            Ok(kind) => kind,
            Err(e) => return ExecutionResult::failure(vec![e]),
        };
        let strategy = self.strategies.for_kind(kind);
        strategy.execute(&task, &ctx, cancel).await
    }

    /// Latest execution for a task, if any; the SSE endpoint resolves the
    /// stream to attach to through this.
    pub async fn latest_execution(&self, task_id: Uuid) -> Result<Option<TaskExecution>> {
        Ok(self.executions.list_for_task(task_id).await?.into_iter().next())
    }
}
