//! Task domain service: lifecycle transitions, domain events, and the
//! best-effort pull-request hook on completion.

use crate::{
    cancel::CancellationFlag,
    clients::{CreatePullRequest, GitHubClient},
    config::GitHubConfig,
    events::{DomainEvent, EventPublisher},
    models::{CodingTask, TaskComplexity, TaskExecution, TaskStatus, TaskType},
    store::{TaskPage, TaskRepository},
    ForgeError, Result,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Exclusive writer for task state. Every transition validates the status
/// machine and emits the corresponding domain event.
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    events: Arc<dyn EventPublisher>,
    github: Option<Arc<GitHubClient>>,
    github_config: GitHubConfig,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        events: Arc<dyn EventPublisher>,
        github: Option<Arc<GitHubClient>>,
        github_config: GitHubConfig,
    ) -> Self {
        Self {
            tasks,
            events,
            github,
            github_config,
        }
    }

    pub async fn create(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<CodingTask> {
        if title.trim().is_empty() {
            return Err(ForgeError::Validation("Task title is required".into()));
        }
        if description.trim().is_empty() {
            return Err(ForgeError::Validation(
                "Task description is required".into(),
            ));
        }

        let task = CodingTask::new(user_id, title.trim(), description.trim());
        self.tasks.insert(task.clone()).await?;
        self.events
            .publish(DomainEvent::TaskCreated {
                task_id: task.id,
                user_id: task.user_id.clone(),
                title: task.title.clone(),
                task_type: task.task_type,
                complexity: task.complexity,
            })
            .await;
        info!(task_id = %task.id, "Task created");
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<CodingTask> {
        self.tasks
            .get(id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("task {id}")))
    }

    pub async fn list_by_user(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<TaskPage> {
        self.tasks
            .list_by_user(user_id, page, page_size, search)
            .await
    }

    pub async fn update(
        &self,
        id: Uuid,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<CodingTask> {
        let mut task = self.get(id).await?;
        if task.is_terminal() {
            return Err(ForgeError::Conflict(format!(
                "task {id} is {} and can no longer be edited",
                task.status
            )));
        }
        if let Some(title) = title {
            if title.trim().is_empty() {
                return Err(ForgeError::Validation("Task title cannot be blank".into()));
            }
            task.title = title.trim().to_string();
        }
        if let Some(description) = description {
            if description.trim().is_empty() {
                return Err(ForgeError::Validation(
                    "Task description cannot be blank".into(),
                ));
            }
            task.description = description.trim().to_string();
        }
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Deletion is refused while the task is running.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let task = self.get(id).await?;
        if task.status == TaskStatus::InProgress {
            return Err(ForgeError::Conflict(format!(
                "task {id} is in progress and cannot be deleted"
            )));
        }
        self.tasks.delete(id).await?;
        info!(task_id = %id, "Task deleted");
        Ok(())
    }

    /// Applies classification output. Idempotent for already-classified
    /// tasks; a no-op for tasks already past `Classifying`.
    pub async fn classify(
        &self,
        id: Uuid,
        task_type: Option<TaskType>,
        complexity: TaskComplexity,
    ) -> Result<CodingTask> {
        let mut task = self.get(id).await?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Classifying) {
            return Ok(task);
        }
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Classifying;
        }
        if let Some(task_type) = task_type {
            task.task_type = Some(task_type);
        }
        task.complexity = Some(complexity);
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Pending/Classifying → InProgress. A still-unclassified task gets
    /// the default complexity first so the state invariant holds.
    pub async fn start(&self, id: Uuid, execution: &TaskExecution) -> Result<CodingTask> {
        let mut task = self.get(id).await?;

        if task.is_terminal() {
            // Re-execution of a finished task: terminal status is
            // preserved, the event is still emitted.
            self.publish_started(&task, execution).await;
            return Ok(task);
        }

        if !task.status.can_transition_to(TaskStatus::InProgress) {
            return Err(ForgeError::Conflict(format!(
                "task {id} cannot start from status {}",
                task.status
            )));
        }
        if task.complexity.is_none() {
            task.complexity = Some(TaskComplexity::Medium);
        }
        task.status = TaskStatus::InProgress;
        self.tasks.update(&task).await?;
        self.publish_started(&task, execution).await;
        info!(task_id = %id, strategy = %execution.strategy, "Task started");
        Ok(task)
    }

    async fn publish_started(&self, task: &CodingTask, execution: &TaskExecution) {
        self.events
            .publish(DomainEvent::TaskStarted {
                task_id: task.id,
                execution_id: execution.id,
                strategy: execution.strategy.clone(),
            })
            .await;
    }

    /// InProgress → Completed. Already-terminal tasks keep their status;
    /// the event is emitted either way. When the execution produced code
    /// and the task has no PR yet, a pull request is opened best-effort.
    pub async fn complete(
        &self,
        id: Uuid,
        execution: &TaskExecution,
        produced_changes: bool,
    ) -> Result<CodingTask> {
        let mut task = self.get(id).await?;

        if !task.is_terminal() {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(chrono::Utc::now());
            self.tasks.update(&task).await?;
        }

        self.events
            .publish(DomainEvent::TaskCompleted {
                task_id: task.id,
                execution_id: execution.id,
                strategy: execution.strategy.clone(),
                tokens_used: execution.tokens_used,
                cost_usd: execution.cost_usd,
                duration_ms: execution.duration_ms,
            })
            .await;

        if produced_changes && task.pr_number.is_none() {
            self.try_open_pull_request(&mut task).await;
        }
        info!(task_id = %id, "Task completed");
        Ok(task)
    }

    /// InProgress → Failed, with the same terminal-status preservation as
    /// `complete`.
    pub async fn fail(&self, id: Uuid, execution: &TaskExecution) -> Result<CodingTask> {
        let mut task = self.get(id).await?;

        if !task.is_terminal() {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(chrono::Utc::now());
            self.tasks.update(&task).await?;
        }

        self.events
            .publish(DomainEvent::TaskFailed {
                task_id: task.id,
                execution_id: execution.id,
                strategy: execution.strategy.clone(),
                tokens_used: execution.tokens_used,
                cost_usd: execution.cost_usd,
                duration_ms: execution.duration_ms,
                error: execution.error.clone().unwrap_or_default(),
            })
            .await;
        info!(task_id = %id, "Task failed");
        Ok(task)
    }

    /// Best-effort PR creation: a GitHub outage logs and moves on, it
    /// never fails the task.
    async fn try_open_pull_request(&self, task: &mut CodingTask) {
        let Some(github) = &self.github else {
            return;
        };

        let short_id = task.id.simple().to_string();
        let request = CreatePullRequest {
            owner: self.github_config.bot_owner.clone(),
            repo: self.github_config.bot_repo.clone(),
            title: task.title.clone(),
            body: format!("Automated change for task {}\n\n{}", task.id, task.description),
            head: format!("task/{}", &short_id[..12]),
            base: self.github_config.base_branch.clone(),
            is_draft: self.github_config.draft_pull_requests,
        };

        match github
            .create_pull_request(&request, &CancellationFlag::new())
            .await
        {
            Ok(pr) => {
                task.pr_number = Some(pr.number);
                task.pr_url = Some(pr.html_url.clone());
                if let Err(e) = self.tasks.update(task).await {
                    warn!(task_id = %task.id, error = %e, "Failed to store PR reference");
                }
                self.events
                    .publish(DomainEvent::PullRequestCreated {
                        task_id: task.id,
                        pr_number: pr.number,
                        pr_url: pr.html_url,
                    })
                    .await;
                info!(task_id = %task.id, pr = pr.number, "Pull request opened");
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Skipping PR creation");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::InMemoryEventPublisher;
    use crate::store::InMemoryTaskRepository;

    fn service() -> (TaskService, Arc<InMemoryEventPublisher>) {
        let events = Arc::new(InMemoryEventPublisher::new());
        let service = TaskService::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::clone(&events) as Arc<dyn EventPublisher>,
            None,
            Config::default().github,
        );
        (service, events)
    }

    fn execution(task_id: Uuid) -> TaskExecution {
        TaskExecution::new(task_id, "SingleShot", "gpt-4o-mini")
    }

    #[tokio::test]
    async fn create_validates_and_emits() {
        let (service, events) = service();
        assert!(service.create("u1", "", "desc").await.is_err());
        assert!(service.create("u1", "title", "  ").await.is_err());

        let task = service.create("u1", "Fix it", "Please fix it").await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(
            events.names_for_task(task.id).await,
            vec!["TaskCreatedEvent"]
        );
    }

    #[tokio::test]
    async fn lifecycle_events_appear_in_order() {
        let (service, events) = service();
        let task = service.create("u1", "T", "D").await.unwrap();
        let execution = execution(task.id);

        service.start(task.id, &execution).await.unwrap();
        service.complete(task.id, &execution, false).await.unwrap();

        assert_eq!(
            events.names_for_task(task.id).await,
            vec!["TaskCreatedEvent", "TaskStartedEvent", "TaskCompletedEvent"]
        );
    }

    #[tokio::test]
    async fn start_applies_default_complexity() {
        let (service, _) = service();
        let task = service.create("u1", "T", "D").await.unwrap();
        assert!(task.complexity.is_none());

        let started = service.start(task.id, &execution(task.id)).await.unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
        assert_eq!(started.complexity, Some(TaskComplexity::Medium));
    }

    #[tokio::test]
    async fn in_progress_tasks_cannot_be_deleted() {
        let (service, _) = service();
        let task = service.create("u1", "T", "D").await.unwrap();
        service.start(task.id, &execution(task.id)).await.unwrap();

        assert!(matches!(
            service.delete(task.id).await,
            Err(ForgeError::Conflict(_))
        ));

        service
            .complete(task.id, &execution(task.id), false)
            .await
            .unwrap();
        service.delete(task.id).await.unwrap();
    }

    #[tokio::test]
    async fn re_execution_preserves_terminal_status_but_emits_events() {
        let (service, events) = service();
        let task = service.create("u1", "T", "D").await.unwrap();
        let first = execution(task.id);
        service.start(task.id, &first).await.unwrap();
        service.complete(task.id, &first, false).await.unwrap();

        // Second run of an already-completed task.
        let second = execution(task.id);
        let after_start = service.start(task.id, &second).await.unwrap();
        assert_eq!(after_start.status, TaskStatus::Completed);
        let after_fail = service.fail(task.id, &second).await.unwrap();
        assert_eq!(after_fail.status, TaskStatus::Completed);

        assert_eq!(
            events.names_for_task(task.id).await,
            vec![
                "TaskCreatedEvent",
                "TaskStartedEvent",
                "TaskCompletedEvent",
                "TaskStartedEvent",
                "TaskFailedEvent"
            ]
        );
    }

    #[tokio::test]
    async fn classification_is_idempotent_and_stops_after_start() {
        let (service, _) = service();
        let task = service.create("u1", "T", "D").await.unwrap();

        let classified = service
            .classify(task.id, Some(TaskType::BugFix), TaskComplexity::Simple)
            .await
            .unwrap();
        assert_eq!(classified.status, TaskStatus::Classifying);
        assert_eq!(classified.complexity, Some(TaskComplexity::Simple));

        // Re-classification while still classifying updates in place.
        let reclassified = service
            .classify(task.id, None, TaskComplexity::Medium)
            .await
            .unwrap();
        assert_eq!(reclassified.complexity, Some(TaskComplexity::Medium));

        service.start(task.id, &execution(task.id)).await.unwrap();
        let after_start = service
            .classify(task.id, None, TaskComplexity::Epic)
            .await
            .unwrap();
        // Classification after start is a no-op.
        assert_eq!(after_start.complexity, Some(TaskComplexity::Medium));
    }

    #[tokio::test]
    async fn terminal_tasks_reject_edits() {
        let (service, _) = service();
        let task = service.create("u1", "T", "D").await.unwrap();
        let execution = execution(task.id);
        service.start(task.id, &execution).await.unwrap();
        service.fail(task.id, &execution).await.unwrap();

        assert!(matches!(
            service.update(task.id, Some("New title"), None).await,
            Err(ForgeError::Conflict(_))
        ));
    }
}
