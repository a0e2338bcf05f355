use crate::models::{TaskComplexity, TaskType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Domain events published to the message bus
///
/// Events for one task id are published in lifecycle order: `Created`
/// before `Started` before any terminal event; re-executions interleave as
/// Started/terminal pairs per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "PascalCase")]
pub enum DomainEvent {
    #[serde(rename = "TaskCreatedEvent")]
    TaskCreated {
        task_id: Uuid,
        user_id: String,
        title: String,
        task_type: Option<TaskType>,
        complexity: Option<TaskComplexity>,
    },
    #[serde(rename = "TaskStartedEvent")]
    TaskStarted {
        task_id: Uuid,
        execution_id: Uuid,
        strategy: String,
    },
    #[serde(rename = "TaskCompletedEvent")]
    TaskCompleted {
        task_id: Uuid,
        execution_id: Uuid,
        strategy: String,
        tokens_used: u64,
        cost_usd: f64,
        duration_ms: u64,
    },
    #[serde(rename = "TaskFailedEvent")]
    TaskFailed {
        task_id: Uuid,
        execution_id: Uuid,
        strategy: String,
        tokens_used: u64,
        cost_usd: f64,
        duration_ms: u64,
        error: String,
    },
    #[serde(rename = "PullRequestCreatedEvent")]
    PullRequestCreated {
        task_id: Uuid,
        pr_number: u64,
        pr_url: String,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskCreated { .. } => "TaskCreatedEvent",
            DomainEvent::TaskStarted { .. } => "TaskStartedEvent",
            DomainEvent::TaskCompleted { .. } => "TaskCompletedEvent",
            DomainEvent::TaskFailed { .. } => "TaskFailedEvent",
            DomainEvent::PullRequestCreated { .. } => "PullRequestCreatedEvent",
        }
    }

    /// Correlation id: the task the event belongs to.
    pub fn task_id(&self) -> Uuid {
        match self {
            DomainEvent::TaskCreated { task_id, .. }
            | DomainEvent::TaskStarted { task_id, .. }
            | DomainEvent::TaskCompleted { task_id, .. }
            | DomainEvent::TaskFailed { task_id, .. }
            | DomainEvent::PullRequestCreated { task_id, .. } => *task_id,
        }
    }
}

/// JSON envelope the bus carries: stable name, correlation id, timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub name: String,
    pub correlation_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn wrap(event: DomainEvent) -> Self {
        Self {
            name: event.name().to_string(),
            correlation_id: event.task_id(),
            timestamp: chrono::Utc::now(),
            event,
        }
    }
}

/// Outbound seam to the message bus. Publication is fire-and-forget from
/// the core's perspective; broker failures are the implementation's problem
/// to log, never the caller's to handle.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

/// Publisher that records envelopes in memory and logs each one.
///
/// Serves as the default wiring when no broker is configured and as the
/// assertion point for lifecycle-ordering tests.
#[derive(Default)]
pub struct InMemoryEventPublisher {
    events: RwLock<Vec<EventEnvelope>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded(&self) -> Vec<EventEnvelope> {
        self.events.read().await.clone()
    }

    pub async fn names_for_task(&self, task_id: Uuid) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.correlation_id == task_id)
            .map(|e| e.name.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: DomainEvent) {
        let envelope = EventEnvelope::wrap(event);
        info!(
            event = envelope.name.as_str(),
            task_id = %envelope.correlation_id,
            "Publishing domain event"
        );
        self.events.write().await.push(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn envelope_carries_stable_name_and_correlation_id() {
        let task_id = Uuid::new_v4();
        let publisher = InMemoryEventPublisher::new();
        publisher
            .publish(DomainEvent::TaskCreated {
                task_id,
                user_id: "u1".into(),
                title: "t".into(),
                task_type: None,
                complexity: None,
            })
            .await;

        let recorded = publisher.recorded().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].name, "TaskCreatedEvent");
        assert_eq!(recorded[0].correlation_id, task_id);
    }

    #[test]
    fn event_serializes_with_tagged_name() {
        let event = DomainEvent::PullRequestCreated {
            task_id: Uuid::new_v4(),
            pr_number: 7,
            pr_url: "https://example.com/pr/7".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "PullRequestCreatedEvent");
        assert_eq!(json["pr_number"], 7);
    }
}
