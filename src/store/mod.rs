//! Repository seams over the task, execution and feedback stores.
//!
//! The core prescribes no persistence engine; these traits are the whole
//! contract, and the in-memory implementations back the default server
//! wiring and the test suites. All task writes flow through the task
//! service, which is the exclusive writer.

use crate::{
    models::{CodingTask, Feedback, TaskExecution},
    ForgeError, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One page of a task listing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskPage {
    pub items: Vec<CodingTask>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: CodingTask) -> Result<()>;
    async fn update(&self, task: &CodingTask) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<CodingTask>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn list_by_user(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<TaskPage>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, execution: TaskExecution) -> Result<()>;
    async fn update(&self, execution: &TaskExecution) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<TaskExecution>>;
    /// Executions for a task, most recently started first.
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<TaskExecution>>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn insert(&self, feedback: Feedback) -> Result<()>;
    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Feedback>>;
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<Uuid, CodingTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: CodingTask) -> Result<()> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn update(&self, task: &CodingTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(ForgeError::NotFound(format!("task {}", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CodingTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        if self.tasks.write().await.remove(&id).is_none() {
            return Err(ForgeError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<TaskPage> {
        let tasks = self.tasks.read().await;
        let needle = search.map(|s| s.to_lowercase());
        let mut matching: Vec<CodingTask> = tasks
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| match &needle {
                Some(needle) => {
                    t.title.to_lowercase().contains(needle)
                        || t.description.to_lowercase().contains(needle)
                }
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let page = page.max(1);
        let items = matching
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(TaskPage {
            items,
            total,
            page,
            page_size,
        })
    }
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<Uuid, TaskExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn insert(&self, execution: TaskExecution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution);
        Ok(())
    }

    async fn update(&self, execution: &TaskExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(ForgeError::NotFound(format!("execution {}", execution.id)));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<TaskExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<TaskExecution>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<TaskExecution> = executions
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    feedback: RwLock<Vec<Feedback>>,
}

impl InMemoryFeedbackRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn insert(&self, feedback: Feedback) -> Result<()> {
        self.feedback.write().await.push(feedback);
        Ok(())
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Feedback>> {
        Ok(self
            .feedback
            .read()
            .await
            .iter()
            .filter(|f| f.task_id == task_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listing_pages_and_searches() {
        let repo = InMemoryTaskRepository::new();
        for i in 0..5 {
            let task = CodingTask::new("u1", format!("Task {i}"), format!("description {i}"));
            repo.insert(task).await.unwrap();
        }
        repo.insert(CodingTask::new("u2", "Other user", "not listed"))
            .await
            .unwrap();

        let page = repo.list_by_user("u1", 1, 3, None).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 5);

        let page2 = repo.list_by_user("u1", 2, 3, None).await.unwrap();
        assert_eq!(page2.items.len(), 2);

        let searched = repo.list_by_user("u1", 1, 10, Some("Task 3")).await.unwrap();
        assert_eq!(searched.total, 1);
        assert_eq!(searched.items[0].title, "Task 3");
    }

    #[tokio::test]
    async fn executions_list_newest_first() {
        let repo = InMemoryExecutionRepository::new();
        let task_id = Uuid::new_v4();
        let mut first = TaskExecution::new(task_id, "SingleShot", "m");
        first.started_at = chrono::Utc::now() - chrono::Duration::seconds(60);
        let second = TaskExecution::new(task_id, "Iterative", "m");
        repo.insert(first.clone()).await.unwrap();
        repo.insert(second.clone()).await.unwrap();

        let listed = repo.list_for_task(task_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn updating_a_missing_execution_is_not_found() {
        let repo = InMemoryExecutionRepository::new();
        let execution = TaskExecution::new(Uuid::new_v4(), "SingleShot", "m");
        assert!(matches!(
            repo.update(&execution).await,
            Err(ForgeError::NotFound(_))
        ));
    }
}
