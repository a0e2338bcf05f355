use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};
use uuid::Uuid;

/// A user-supplied unit of coding work
///
/// Tasks are the fundamental unit of work in the orchestration core. Each
/// task moves through a fixed status state machine and may be executed any
/// number of times; executions after the first do not alter terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingTask {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub task_type: Option<TaskType>,
    pub complexity: Option<TaskComplexity>,
    pub status: TaskStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
}

impl CodingTask {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: title.into(),
            description: description.into(),
            task_type: None,
            complexity: None,
            status: TaskStatus::Pending,
            created_at: chrono::Utc::now(),
            completed_at: None,
            pr_number: None,
            pr_url: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Category of work a task represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    BugFix,
    Feature,
    Refactor,
    Documentation,
    Test,
    Deployment,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::BugFix => "bug_fix",
            TaskType::Feature => "feature",
            TaskType::Refactor => "refactor",
            TaskType::Documentation => "documentation",
            TaskType::Test => "test",
            TaskType::Deployment => "deployment",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bug_fix" | "bugfix" => Ok(TaskType::BugFix),
            "feature" => Ok(TaskType::Feature),
            "refactor" => Ok(TaskType::Refactor),
            "documentation" | "docs" => Ok(TaskType::Documentation),
            "test" => Ok(TaskType::Test),
            "deployment" => Ok(TaskType::Deployment),
            _ => Err(format!("Unknown task type: {s}")),
        }
    }
}

/// Estimated difficulty of a task; drives strategy selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Simple,
    Medium,
    Complex,
    Epic,
}

impl fmt::Display for TaskComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskComplexity::Simple => "simple",
            TaskComplexity::Medium => "medium",
            TaskComplexity::Complex => "complex",
            TaskComplexity::Epic => "epic",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskComplexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(TaskComplexity::Simple),
            "medium" => Ok(TaskComplexity::Medium),
            "complex" => Ok(TaskComplexity::Complex),
            "epic" => Ok(TaskComplexity::Epic),
            _ => Err(format!("Unknown complexity: {s}")),
        }
    }
}

/// Task lifecycle status
///
/// Transitions only move forward: `Pending → Classifying → InProgress →
/// (Completed | Failed | Cancelled)`. Deletion is refused while InProgress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Classifying,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Classifying)
                | (Pending, InProgress)
                | (Classifying, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Classifying => "classifying",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One attempt at fulfilling a task via a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub strategy: String,
    pub model: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub success: bool,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TaskExecution {
    pub fn new(task_id: Uuid, strategy: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            strategy: strategy.into(),
            model: model.into(),
            started_at: chrono::Utc::now(),
            finished_at: None,
            success: false,
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            error: None,
        }
    }
}

/// Kind of mutation a code change applies to its file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

/// Proposed modification to a single file
///
/// Content carries the full new file body. An empty body is only legal for
/// `Delete` changes; the validator enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChange {
    pub path: String,
    pub language: String,
    pub content: String,
    pub kind: ChangeKind,
}

/// Planner-produced work item within a multi-agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default = "default_subtask_complexity")]
    pub estimated_complexity: u8,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_subtask_complexity() -> u8 {
    5
}

/// Planner output: ordered subtasks plus a free-text strategy note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub subtasks: Vec<SubTask>,
    #[serde(default)]
    pub strategy: String,
}

impl TaskPlan {
    /// Rejects plans whose dependency references do not resolve or whose
    /// dependency graph contains a cycle.
    pub fn validate(&self) -> Result<(), String> {
        let ids: std::collections::HashSet<&str> =
            self.subtasks.iter().map(|s| s.id.as_str()).collect();
        if ids.len() != self.subtasks.len() {
            return Err("Plan contains duplicate subtask ids".to_string());
        }
        for subtask in &self.subtasks {
            for dep in &subtask.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "Subtask {} depends on unknown subtask {dep}",
                        subtask.id
                    ));
                }
            }
        }

        // Kahn's algorithm; anything left unvisited sits on a cycle.
        let mut in_degree: HashMap<&str, usize> = self
            .subtasks
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = ready.pop() {
            visited += 1;
            for subtask in &self.subtasks {
                if subtask.depends_on.iter().any(|d| d == id) {
                    let degree = in_degree.get_mut(subtask.id.as_str()).expect("known id");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(subtask.id.as_str());
                    }
                }
            }
        }
        if visited != self.subtasks.len() {
            return Err("Plan dependency graph contains a cycle".to_string());
        }
        Ok(())
    }
}

/// Uniform output envelope from any agent role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: String,
    pub success: bool,
    pub changes: Vec<CodeChange>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub output: Option<serde_json::Value>,
    pub errors: Vec<String>,
}

impl AgentResult {
    pub fn failure(agent: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            success: false,
            changes: Vec::new(),
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            output: None,
            errors: vec![error.into()],
        }
    }
}

/// Structured reviewer verdict on a merged change set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    /// 1 (cosmetic) through 5 (blocking)
    #[serde(default = "default_review_severity")]
    pub severity: u8,
}

fn default_review_severity() -> u8 {
    1
}

/// Wire request to the external ML classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub task_description: String,
}

/// Wire response from the external ML classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub task_type: TaskType,
    pub complexity: TaskComplexity,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub classifier_used: String,
    #[serde(default)]
    pub suggested_strategy: String,
    #[serde(default)]
    pub estimated_tokens: u64,
}

/// Capability flags advertised by a model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    CodeGeneration,
    ChatCompletion,
    Analysis,
    Review,
    Documentation,
    Testing,
    All,
}

/// Registry entry for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub display_name: String,
    pub capabilities: Vec<ModelCapability>,
    pub available: bool,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl ModelInfo {
    pub fn supports(&self, capability: ModelCapability) -> bool {
        self.capabilities
            .iter()
            .any(|c| *c == capability || *c == ModelCapability::All)
    }
}

/// Success-rate bucket keyed by (task type, complexity)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BucketStats {
    pub executions: u64,
    pub successes: u64,
}

impl BucketStats {
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}

/// Rolling per-model aggregates maintained by the performance tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformanceMetrics {
    pub model: String,
    pub executions: u64,
    pub successes: u64,
    pub avg_tokens: f64,
    pub avg_cost: f64,
    pub avg_duration_ms: f64,
    /// Mean quality score in [1,10]; absent until one is recorded
    pub avg_quality: Option<f64>,
    /// Keys are `<task_type>:<complexity>`
    pub buckets: HashMap<String, BucketStats>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl ModelPerformanceMetrics {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            executions: 0,
            successes: 0,
            avg_tokens: 0.0,
            avg_cost: 0.0,
            avg_duration_ms: 0.0,
            avg_quality: None,
            buckets: HashMap::new(),
            last_updated: chrono::Utc::now(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }

    pub fn bucket_key(task_type: TaskType, complexity: TaskComplexity) -> String {
        format!("{task_type}:{complexity}")
    }
}

/// A/B test lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ABTestStatus {
    Active,
    Completed,
    Cancelled,
}

/// Declared A/B test between two models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTest {
    pub id: Uuid,
    pub name: String,
    pub model_a: String,
    pub model_b: String,
    pub task_type_filter: Option<TaskType>,
    /// Share of traffic enrolled in the test; the rest always sees model A
    pub traffic_percent: u8,
    pub min_samples: u64,
    pub status: ABTestStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ends_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One recorded outcome for a variant within an A/B test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ABTestResult {
    pub request_id: String,
    /// Model name the request was routed to
    pub variant: String,
    pub success: bool,
    pub duration_ms: u64,
    pub tokens: u64,
    pub cost_usd: f64,
    pub quality: Option<f64>,
}

/// User sentiment attached to feedback
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSentiment {
    Positive,
    Negative,
    Neutral,
}

/// User feedback on a task or execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub task_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub user_id: String,
    pub sentiment: FeedbackSentiment,
    /// Normalized rating in [0,1]
    pub rating: f64,
    pub reason: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, String>,
}
