//! Feedback service: records user feedback, analyzes per-procedure
//! patterns and triggers classifier retraining when they are significant.

use crate::{
    cancel::CancellationFlag,
    clients::{ClassifierClient, TrainingFeedback},
    constants,
    models::{Feedback, FeedbackSentiment, TaskComplexity, TaskType},
    store::FeedbackRepository,
    Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound capability the feedback service may use to adjust procedure
/// success counters. Strictly optional; the core never depends on its
/// behavior, and a failure is logged and ignored.
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn record_procedure_outcome(&self, procedure_id: &str, success: bool) -> Result<()>;
}

/// Context key under which feedback references a procedure.
const PROCEDURE_KEY: &str = "procedure_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPattern {
    pub procedure_id: String,
    pub samples: u64,
    pub success_rate: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackAnalysis {
    pub task_id: Uuid,
    pub total_samples: u64,
    pub patterns: Vec<FeedbackPattern>,
}

impl FeedbackAnalysis {
    pub fn has_significant_pattern(&self) -> bool {
        self.patterns.iter().any(|p| p.significant)
    }
}

pub struct FeedbackService {
    store: Arc<dyn FeedbackRepository>,
    classifier: Arc<ClassifierClient>,
    memory: Option<Arc<dyn MemoryService>>,
    retrain_min_samples: u64,
}

impl FeedbackService {
    pub fn new(
        store: Arc<dyn FeedbackRepository>,
        classifier: Arc<ClassifierClient>,
        memory: Option<Arc<dyn MemoryService>>,
    ) -> Self {
        Self {
            store,
            classifier,
            memory,
            retrain_min_samples: constants::RETRAIN_MIN_SAMPLES,
        }
    }

    fn is_positive(feedback: &Feedback) -> bool {
        feedback.sentiment == FeedbackSentiment::Positive || feedback.rating >= 0.5
    }

    pub async fn record(&self, feedback: Feedback) -> Result<()> {
        let positive = Self::is_positive(&feedback);
        let procedure_id = feedback.context.get(PROCEDURE_KEY).cloned();
        self.store.insert(feedback).await?;

        if let (Some(memory), Some(procedure_id)) = (&self.memory, procedure_id) {
            if let Err(e) = memory
                .record_procedure_outcome(&procedure_id, positive)
                .await
            {
                warn!(procedure_id, error = %e, "Memory service update failed");
            }
        }
        Ok(())
    }

    /// Forwards one execution outcome to the classifier's training
    /// endpoint. Best-effort; outages are logged and ignored.
    pub async fn record_execution_outcome(
        &self,
        description: &str,
        task_type: TaskType,
        complexity: TaskComplexity,
        success: bool,
    ) {
        let sample = TrainingFeedback {
            task_description: description.to_string(),
            task_type,
            complexity,
            success,
        };
        if let Err(e) = self
            .classifier
            .send_training_feedback(&sample, &CancellationFlag::new())
            .await
        {
            debug!(error = %e, "Training feedback not delivered");
        }
    }

    /// Groups a task's feedback by procedure; a pattern is significant
    /// when its success rate sits clearly away from the coin flip.
    pub async fn analyze_patterns(&self, task_id: Uuid) -> Result<FeedbackAnalysis> {
        let entries = self.store.list_for_task(task_id).await?;
        let mut groups: HashMap<String, (u64, u64)> = HashMap::new();
        for entry in &entries {
            let Some(procedure_id) = entry.context.get(PROCEDURE_KEY) else {
                continue;
            };
            let group = groups.entry(procedure_id.clone()).or_insert((0, 0));
            group.0 += 1;
            if Self::is_positive(entry) {
                group.1 += 1;
            }
        }

        let patterns = groups
            .into_iter()
            .map(|(procedure_id, (samples, positives))| {
                let success_rate = positives as f64 / samples as f64;
                FeedbackPattern {
                    significant: (success_rate - 0.5).abs()
                        > constants::FEEDBACK_SIGNIFICANCE_DELTA,
                    procedure_id,
                    samples,
                    success_rate,
                }
            })
            .collect();

        Ok(FeedbackAnalysis {
            task_id,
            total_samples: entries.len() as u64,
            patterns,
        })
    }

    /// Triggers classifier retraining when the analysis carries at least
    /// one significant pattern and enough samples. Never propagates
    /// failures.
    pub async fn update_model_parameters(&self, analysis: &FeedbackAnalysis) {
        if !analysis.has_significant_pattern() {
            debug!(task_id = %analysis.task_id, "No significant pattern, skipping retrain");
            return;
        }
        if analysis.total_samples < self.retrain_min_samples {
            debug!(
                task_id = %analysis.task_id,
                samples = analysis.total_samples,
                floor = self.retrain_min_samples,
                "Below retrain sample floor"
            );
            return;
        }

        match self
            .classifier
            .trigger_retrain(&CancellationFlag::new())
            .await
        {
            Ok(()) => info!(task_id = %analysis.task_id, "Classifier retraining triggered"),
            Err(e) => warn!(task_id = %analysis.task_id, error = %e, "Retrain trigger failed"),
        }
    }
}
