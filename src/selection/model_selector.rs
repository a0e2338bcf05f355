use crate::{
    abtest::AbTestEngine,
    constants,
    models::{TaskComplexity, TaskType},
    performance::PerformanceTracker,
    registry::ModelRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of model selection, with the reasoning surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub model: String,
    pub reason: String,
    pub confidence: f64,
    pub is_ab_test: bool,
    pub ab_test_id: Option<Uuid>,
    pub alternatives: Vec<String>,
}

/// Complexity-ordered preference lists: cheap and quick first for simple
/// work, the large tier first for complex work.
fn preference_list(complexity: TaskComplexity) -> &'static [&'static str] {
    match complexity {
        TaskComplexity::Simple => &["gpt-4o-mini", "claude-3-haiku", "gpt-4o"],
        TaskComplexity::Medium => &["gpt-4o-mini", "gpt-4o", "claude-3-5-sonnet"],
        TaskComplexity::Complex | TaskComplexity::Epic => {
            &["gpt-4o", "claude-3-5-sonnet", "gpt-4-turbo", "gpt-4o-mini"]
        }
    }
}

/// Chooses the model for a request by combining the A/B engine, the
/// performance tracker and the registry, in that priority order.
pub struct ModelSelector {
    registry: Arc<ModelRegistry>,
    tracker: Arc<PerformanceTracker>,
    ab_engine: Arc<AbTestEngine>,
}

impl ModelSelector {
    pub fn new(
        registry: Arc<ModelRegistry>,
        tracker: Arc<PerformanceTracker>,
        ab_engine: Arc<AbTestEngine>,
    ) -> Self {
        Self {
            registry,
            tracker,
            ab_engine,
        }
    }

    pub async fn select_best_model(
        &self,
        _description: &str,
        task_type: TaskType,
        complexity: TaskComplexity,
        request_id: &str,
    ) -> ModelSelection {
        let available: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|m| m.available)
            .map(|m| m.name)
            .collect();

        // 1. Active A/B test wins.
        if let Some(test) = self.ab_engine.get_active_test(Some(task_type)).await {
            let model = self.ab_engine.select_variant(&test, request_id);
            debug!(test_id = %test.id, model = %model, "A/B test decided the model");
            return ModelSelection {
                alternatives: alternatives_excluding(&available, &model),
                reason: format!("A/B test '{}' variant assignment", test.name),
                confidence: 0.5,
                is_ab_test: true,
                ab_test_id: Some(test.id),
                model,
            };
        }

        // 2. Best historical performer, if the registry still carries it.
        if let Some(best) = self.tracker.get_best(task_type, complexity).await {
            if available.iter().any(|m| *m == best) {
                let confidence = self
                    .tracker
                    .get(&best)
                    .await
                    .map(|m| m.success_rate())
                    .unwrap_or(0.0);
                return ModelSelection {
                    alternatives: alternatives_excluding(&available, &best),
                    reason: format!(
                        "Best historical success rate for {task_type}/{complexity}"
                    ),
                    confidence,
                    is_ab_test: false,
                    ab_test_id: None,
                    model: best,
                };
            }
        }

        // 3. Complexity-ordered preference list intersected with the
        // registry.
        for candidate in preference_list(complexity) {
            if available.iter().any(|m| m == candidate) {
                return ModelSelection {
                    model: candidate.to_string(),
                    reason: format!("Preference list for {complexity} complexity"),
                    confidence: 0.6,
                    is_ab_test: false,
                    ab_test_id: None,
                    alternatives: alternatives_excluding(&available, candidate),
                };
            }
        }

        // 4. Safe default.
        warn!(
            %task_type,
            %complexity,
            "No model matched any selection rule, falling back to the default"
        );
        ModelSelection {
            model: constants::DEFAULT_MODEL.to_string(),
            reason: "Fallback default model".to_string(),
            confidence: 0.0,
            is_ab_test: false,
            ab_test_id: None,
            alternatives: alternatives_excluding(&available, constants::DEFAULT_MODEL),
        }
    }
}

/// Top 3 other available models, excluding the selected one.
fn alternatives_excluding(available: &[String], selected: &str) -> Vec<String> {
    available
        .iter()
        .filter(|m| *m != selected)
        .take(3)
        .cloned()
        .collect()
}
