//! Per-model performance tracker: rolling aggregates and best-model lookup.

use crate::models::{BucketStats, ModelPerformanceMetrics, TaskComplexity, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One finished execution's contribution to the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelExecutionRecord {
    pub model: String,
    pub task_type: TaskType,
    pub complexity: TaskComplexity,
    pub success: bool,
    pub tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// Optional quality score in [1,10]; clamped on record
    pub quality: Option<f64>,
}

/// Process-wide model performance aggregates.
///
/// Writes serialize through the write lock; reads take a snapshot. The
/// aggregates are replay-safe in the sense that ordering of concurrent
/// records does not affect the resulting means.
pub struct PerformanceTracker {
    metrics: RwLock<HashMap<String, ModelPerformanceMetrics>>,
    min_samples: u64,
}

impl PerformanceTracker {
    pub fn new(min_samples: u64) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            min_samples: min_samples.max(1),
        }
    }

    pub async fn record_execution(&self, record: ModelExecutionRecord) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics
            .entry(record.model.clone())
            .or_insert_with(|| ModelPerformanceMetrics::new(record.model.as_str()));

        let n = entry.executions as f64;
        entry.executions += 1;
        if record.success {
            entry.successes += 1;
        }
        let next = entry.executions as f64;
        entry.avg_tokens = (entry.avg_tokens * n + record.tokens as f64) / next;
        entry.avg_cost = (entry.avg_cost * n + record.cost_usd) / next;
        entry.avg_duration_ms = (entry.avg_duration_ms * n + record.duration_ms as f64) / next;

        if let Some(quality) = record.quality {
            let quality = quality.clamp(1.0, 10.0);
            entry.avg_quality = Some(match entry.avg_quality {
                // Quality is optional per record, so its mean runs on its
                // own effective sample count approximation.
                Some(current) => (current + quality) / 2.0,
                None => quality,
            });
        }

        let key = ModelPerformanceMetrics::bucket_key(record.task_type, record.complexity);
        let bucket = entry.buckets.entry(key).or_insert_with(BucketStats::default);
        bucket.executions += 1;
        if record.success {
            bucket.successes += 1;
        }
        entry.last_updated = chrono::Utc::now();

        debug!(
            model = %record.model,
            executions = entry.executions,
            success_rate = entry.success_rate(),
            "Recorded model execution"
        );
    }

    pub async fn get(&self, model: &str) -> Option<ModelPerformanceMetrics> {
        self.metrics.read().await.get(model).cloned()
    }

    pub async fn get_all(&self) -> HashMap<String, ModelPerformanceMetrics> {
        self.metrics.read().await.clone()
    }

    /// Best model for a (task type, complexity) pair: highest bucket
    /// success rate among models with at least `min_samples` in that
    /// bucket; ties break to lower mean cost, then lower mean duration.
    /// None when nothing clears the floor.
    pub async fn get_best(
        &self,
        task_type: TaskType,
        complexity: TaskComplexity,
    ) -> Option<String> {
        let key = ModelPerformanceMetrics::bucket_key(task_type, complexity);
        let metrics = self.metrics.read().await;

        let mut candidates: Vec<(&String, f64, f64, f64)> = metrics
            .iter()
            .filter_map(|(name, m)| {
                let bucket = m.buckets.get(&key)?;
                if bucket.executions < self.min_samples {
                    return None;
                }
                Some((name, bucket.success_rate(), m.avg_cost, m.avg_duration_ms))
            })
            .collect();

        // Name as the final tie-break keeps the choice deterministic for
        // identical aggregates regardless of map iteration order.
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.0.cmp(b.0))
        });

        candidates.first().map(|(name, ..)| (*name).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, success: bool) -> ModelExecutionRecord {
        ModelExecutionRecord {
            model: model.to_string(),
            task_type: TaskType::Feature,
            complexity: TaskComplexity::Medium,
            success,
            tokens: 1000,
            cost_usd: 0.01,
            duration_ms: 2000,
            quality: None,
        }
    }

    #[tokio::test]
    async fn aggregates_accumulate_means() {
        let tracker = PerformanceTracker::new(1);
        let mut first = record("m1", true);
        first.tokens = 100;
        let mut second = record("m1", false);
        second.tokens = 300;
        tracker.record_execution(first).await;
        tracker.record_execution(second).await;

        let metrics = tracker.get("m1").await.unwrap();
        assert_eq!(metrics.executions, 2);
        assert_eq!(metrics.successes, 1);
        assert!((metrics.avg_tokens - 200.0).abs() < 1e-9);
        assert!((metrics.success_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_best_requires_the_sample_floor() {
        let tracker = PerformanceTracker::new(30);
        for _ in 0..29 {
            tracker.record_execution(record("m1", true)).await;
        }
        assert!(tracker
            .get_best(TaskType::Feature, TaskComplexity::Medium)
            .await
            .is_none());

        tracker.record_execution(record("m1", true)).await;
        assert_eq!(
            tracker
                .get_best(TaskType::Feature, TaskComplexity::Medium)
                .await,
            Some("m1".to_string())
        );
    }

    #[tokio::test]
    async fn get_best_prefers_higher_success_then_lower_cost() {
        let tracker = PerformanceTracker::new(2);

        for i in 0..4 {
            tracker.record_execution(record("winner", i < 4)).await;
        }
        for i in 0..4 {
            tracker.record_execution(record("loser", i < 2)).await;
        }
        assert_eq!(
            tracker
                .get_best(TaskType::Feature, TaskComplexity::Medium)
                .await,
            Some("winner".to_string())
        );

        // Equal success rates: the cheaper model wins.
        let cheap_tracker = PerformanceTracker::new(2);
        for _ in 0..3 {
            let mut r = record("pricey", true);
            r.cost_usd = 0.10;
            cheap_tracker.record_execution(r).await;
            let mut r = record("cheap", true);
            r.cost_usd = 0.01;
            cheap_tracker.record_execution(r).await;
        }
        assert_eq!(
            cheap_tracker
                .get_best(TaskType::Feature, TaskComplexity::Medium)
                .await,
            Some("cheap".to_string())
        );
    }

    #[tokio::test]
    async fn buckets_are_scoped_to_type_and_complexity() {
        let tracker = PerformanceTracker::new(1);
        tracker.record_execution(record("m1", true)).await;

        assert!(tracker
            .get_best(TaskType::BugFix, TaskComplexity::Medium)
            .await
            .is_none());
        assert!(tracker
            .get_best(TaskType::Feature, TaskComplexity::Simple)
            .await
            .is_none());
        assert!(tracker
            .get_best(TaskType::Feature, TaskComplexity::Medium)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn concurrent_records_and_reads_stay_consistent() {
        let tracker = std::sync::Arc::new(PerformanceTracker::new(1));
        let mut handles = Vec::new();

        for i in 0..100 {
            let tracker = std::sync::Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.record_execution(record("m1", i % 2 == 0)).await;
            }));
        }
        for _ in 0..100 {
            let tracker = std::sync::Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                if let Some(metrics) = tracker.get("m1").await {
                    let rate = metrics.success_rate();
                    assert!((0.0..=1.0).contains(&rate));
                    assert!(metrics.executions >= metrics.successes);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metrics = tracker.get("m1").await.unwrap();
        assert_eq!(metrics.executions, 100);
        assert_eq!(metrics.successes, 50);
    }

    #[tokio::test]
    async fn quality_scores_are_clamped() {
        let tracker = PerformanceTracker::new(1);
        let mut r = record("m1", true);
        r.quality = Some(42.0);
        tracker.record_execution(r).await;
        assert_eq!(tracker.get("m1").await.unwrap().avg_quality, Some(10.0));
    }
}
