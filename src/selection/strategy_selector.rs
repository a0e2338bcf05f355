use crate::{
    cancel::CancellationFlag,
    clients::ClassifierClient,
    constants,
    models::{CodingTask, TaskComplexity, TaskType},
    strategies::StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How the strategy decision was reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Override,
    Classifier,
    Heuristic,
}

/// Resolved routing for one execution. The coordinator applies
/// `complexity` back to the task when it is still unclassified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub kind: StrategyKind,
    pub complexity: TaskComplexity,
    pub task_type: TaskType,
    pub source: SelectionSource,
}

const COMPLEX_KEYWORDS: &[&str] = &["architecture", "refactor", "rewrite", "migration", "complex"];
const SIMPLE_KEYWORDS: &[&str] = &["fix", "typo", "small", "minor", "quick", "simple"];

/// Routes tasks to strategies: manual override first, then the ML
/// classifier, then the keyword/word-count heuristic when the classifier
/// is unreachable.
pub struct StrategySelector {
    classifier: Arc<ClassifierClient>,
}

impl StrategySelector {
    pub fn new(classifier: Arc<ClassifierClient>) -> Self {
        Self { classifier }
    }

    pub async fn select(
        &self,
        task: &CodingTask,
        manual_override: Option<&str>,
        cancel: &CancellationFlag,
    ) -> StrategyDecision {
        let started = Instant::now();

        // Manual override wins unconditionally and skips the classifier.
        if let Some(name) = manual_override {
            let decision = match name.parse::<StrategyKind>() {
                Ok(kind) => StrategyDecision {
                    kind,
                    complexity: complexity_for_kind(kind, task.complexity),
                    task_type: task.task_type.unwrap_or(TaskType::Feature),
                    source: SelectionSource::Override,
                },
                Err(_) => {
                    warn!(
                        strategy = name,
                        task_id = %task.id,
                        "Unknown strategy override, falling back to Iterative"
                    );
                    StrategyDecision {
                        kind: StrategyKind::Iterative,
                        complexity: task.complexity.unwrap_or(TaskComplexity::Medium),
                        task_type: task.task_type.unwrap_or(TaskType::Feature),
                        source: SelectionSource::Override,
                    }
                }
            };
            return decision;
        }

        let decision = match self.classifier.classify(&task.description, cancel).await {
            Ok(classification) => {
                // Confidence is not a gate; the returned complexity is
                // taken at face value.
                debug!(
                    task_id = %task.id,
                    complexity = %classification.complexity,
                    confidence = classification.confidence,
                    "Classifier routed the task"
                );
                StrategyDecision {
                    kind: strategy_for_complexity(classification.complexity),
                    complexity: classification.complexity,
                    task_type: classification.task_type,
                    source: SelectionSource::Classifier,
                }
            }
            Err(e) => {
                info!(
                    task_id = %task.id,
                    error = %e,
                    "Classifier unavailable, applying heuristic fallback"
                );
                let complexity = heuristic_complexity(&task.description);
                StrategyDecision {
                    kind: strategy_for_complexity(complexity),
                    complexity,
                    task_type: task.task_type.unwrap_or(TaskType::Feature),
                    source: SelectionSource::Heuristic,
                }
            }
        };

        let elapsed = started.elapsed();
        if elapsed.as_millis() as u64 > constants::STRATEGY_SELECT_BUDGET_MS {
            warn!(
                task_id = %task.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Strategy selection exceeded its latency target"
            );
        }
        decision
    }
}

pub fn strategy_for_complexity(complexity: TaskComplexity) -> StrategyKind {
    match complexity {
        TaskComplexity::Simple => StrategyKind::SingleShot,
        TaskComplexity::Medium => StrategyKind::Iterative,
        TaskComplexity::Complex | TaskComplexity::Epic => StrategyKind::MultiAgent,
    }
}

fn complexity_for_kind(kind: StrategyKind, current: Option<TaskComplexity>) -> TaskComplexity {
    current.unwrap_or(match kind {
        StrategyKind::SingleShot => TaskComplexity::Simple,
        StrategyKind::Iterative => TaskComplexity::Medium,
        StrategyKind::MultiAgent => TaskComplexity::Complex,
    })
}

/// Keyword and word-count heuristic used when the classifier is down.
fn heuristic_complexity(description: &str) -> TaskComplexity {
    let lowered = description.to_lowercase();
    let word_count = lowered.split_whitespace().count();

    if COMPLEX_KEYWORDS.iter().any(|k| lowered.contains(k))
        || word_count > constants::HEURISTIC_COMPLEX_WORD_COUNT
    {
        return TaskComplexity::Complex;
    }
    if SIMPLE_KEYWORDS.iter().any(|k| lowered.contains(k))
        || word_count < constants::HEURISTIC_SIMPLE_WORD_COUNT
    {
        return TaskComplexity::Simple;
    }
    TaskComplexity::Medium
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierConfig;

    fn selector_with_unreachable_classifier() -> StrategySelector {
        let client = ClassifierClient::new(&ClassifierConfig {
            base_url: "http://localhost:1".to_string(),
            timeout_ms: 20,
        })
        .unwrap();
        StrategySelector::new(Arc::new(client))
    }

    #[test]
    fn heuristic_uses_keywords_before_word_count() {
        assert_eq!(
            heuristic_complexity("Please refactor the persistence layer so the repositories share a common base and the tests keep passing for all modules"),
            TaskComplexity::Complex
        );
        assert_eq!(heuristic_complexity("fix typo"), TaskComplexity::Simple);
        // 10 words, no keywords: short means simple.
        assert_eq!(
            heuristic_complexity("one two three four five six seven eight nine ten"),
            TaskComplexity::Simple
        );
    }

    #[test]
    fn heuristic_defaults_to_medium() {
        // 25 neutral words: neither keyword list nor either bound fires.
        let description = (0..25).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(heuristic_complexity(&description), TaskComplexity::Medium);
    }

    #[test]
    fn heuristic_long_descriptions_are_complex() {
        let description = (0..120).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(heuristic_complexity(&description), TaskComplexity::Complex);
    }

    #[tokio::test]
    async fn manual_override_skips_the_classifier() {
        let selector = selector_with_unreachable_classifier();
        let task = CodingTask::new("u1", "t", "whatever this says");

        let decision = selector
            .select(&task, Some("Iterative"), &CancellationFlag::new())
            .await;
        assert_eq!(decision.kind, StrategyKind::Iterative);
        assert_eq!(decision.source, SelectionSource::Override);
    }

    #[tokio::test]
    async fn unknown_override_falls_back_to_iterative() {
        let selector = selector_with_unreachable_classifier();
        let task = CodingTask::new("u1", "t", "d");

        let decision = selector
            .select(&task, Some("QuantumLeap"), &CancellationFlag::new())
            .await;
        assert_eq!(decision.kind, StrategyKind::Iterative);
    }

    #[tokio::test]
    async fn classifier_outage_uses_the_heuristic() {
        let selector = selector_with_unreachable_classifier();
        // Exactly 10 words: the heuristic routes short descriptions to
        // SingleShot.
        let task = CodingTask::new(
            "u1",
            "t",
            "change the greeting text shown on the landing page please",
        );

        let decision = selector.select(&task, None, &CancellationFlag::new()).await;
        assert_eq!(decision.kind, StrategyKind::SingleShot);
        assert_eq!(decision.source, SelectionSource::Heuristic);
        assert_eq!(decision.complexity, TaskComplexity::Simple);
    }

    #[test]
    fn complexity_maps_onto_the_strategy_family() {
        assert_eq!(
            strategy_for_complexity(TaskComplexity::Simple),
            StrategyKind::SingleShot
        );
        assert_eq!(
            strategy_for_complexity(TaskComplexity::Medium),
            StrategyKind::Iterative
        );
        assert_eq!(
            strategy_for_complexity(TaskComplexity::Complex),
            StrategyKind::MultiAgent
        );
        assert_eq!(
            strategy_for_complexity(TaskComplexity::Epic),
            StrategyKind::MultiAgent
        );
    }
}
