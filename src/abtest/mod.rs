//! A/B testing engine: sticky variant assignment and z-test analysis.

use crate::{
    constants,
    models::{ABTest, ABTestResult, ABTestStatus, TaskType},
    ForgeError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAbTestRequest {
    pub name: String,
    #[serde(alias = "modelA")]
    pub model_a: String,
    #[serde(alias = "modelB")]
    pub model_b: String,
    #[serde(default, alias = "taskTypeFilter")]
    pub task_type_filter: Option<TaskType>,
    #[serde(default, alias = "trafficPercent")]
    pub traffic_percent: Option<u8>,
    #[serde(default, alias = "minSamples")]
    pub min_samples: Option<u64>,
    #[serde(default, alias = "durationDays")]
    pub duration_days: Option<i64>,
}

/// Aggregated view of one variant's recorded results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantStats {
    pub samples: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub avg_tokens: f64,
    pub avg_cost: f64,
    pub avg_quality: Option<f64>,
}

/// Analysis of a test: per-variant stats plus the winner decision.
///
/// Quality, duration and cost are reported but never used to pick a
/// winner; only the success-rate z-test decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestAnalysis {
    pub test_id: Uuid,
    pub model_a: String,
    pub model_b: String,
    pub variant_a: VariantStats,
    pub variant_b: VariantStats,
    pub z_score: Option<f64>,
    pub winner: Option<String>,
}

/// Stable 64-bit FNV-1a; assignment must not change across processes, so
/// the std hasher (randomly seeded) is not an option here.
fn stable_hash(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Process-wide A/B test registry.
///
/// Tests and their results live behind one lock pair; reads snapshot,
/// writes serialize. Assignment is pure given (test, request id), which is
/// what makes it sticky.
pub struct AbTestEngine {
    tests: RwLock<HashMap<Uuid, ABTest>>,
    results: RwLock<HashMap<Uuid, Vec<ABTestResult>>>,
    default_traffic_percent: u8,
}

impl AbTestEngine {
    pub fn new(default_traffic_percent: u8) -> Self {
        Self {
            tests: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            default_traffic_percent: default_traffic_percent.min(100),
        }
    }

    pub async fn create_test(&self, request: CreateAbTestRequest) -> Result<ABTest> {
        if request.name.trim().is_empty() {
            return Err(ForgeError::Validation("A/B test name is required".into()));
        }
        if request.model_a.is_empty() || request.model_b.is_empty() {
            return Err(ForgeError::Validation(
                "Both A/B test models are required".into(),
            ));
        }
        if request.model_a == request.model_b {
            return Err(ForgeError::Validation(
                "A/B test models must differ".into(),
            ));
        }
        let traffic_percent = request
            .traffic_percent
            .unwrap_or(self.default_traffic_percent);
        if traffic_percent > 100 {
            return Err(ForgeError::Validation(
                "traffic_percent must be within 0-100".into(),
            ));
        }

        let now = chrono::Utc::now();
        let test = ABTest {
            id: Uuid::new_v4(),
            name: request.name,
            model_a: request.model_a,
            model_b: request.model_b,
            task_type_filter: request.task_type_filter,
            traffic_percent,
            min_samples: request.min_samples.unwrap_or(constants::AB_TEST_MIN_SAMPLES),
            status: ABTestStatus::Active,
            started_at: now,
            ends_at: request.duration_days.map(|d| now + chrono::Duration::days(d)),
        };

        info!(test_id = %test.id, name = %test.name, "A/B test created");
        self.tests.write().await.insert(test.id, test.clone());
        self.results.write().await.insert(test.id, Vec::new());
        Ok(test)
    }

    /// Active test matching the task type (or unfiltered), not past its
    /// end date; most recently started wins ties.
    pub async fn get_active_test(&self, task_type: Option<TaskType>) -> Option<ABTest> {
        let now = chrono::Utc::now();
        let tests = self.tests.read().await;
        tests
            .values()
            .filter(|t| t.status == ABTestStatus::Active)
            .filter(|t| t.ends_at.map(|end| end > now).unwrap_or(true))
            .filter(|t| match (t.task_type_filter, task_type) {
                (None, _) => true,
                (Some(filter), Some(requested)) => filter == requested,
                (Some(_), None) => false,
            })
            .max_by_key(|t| t.started_at)
            .cloned()
    }

    /// Sticky variant assignment. Requests outside the test traffic always
    /// see model A; enrolled requests split 50/50 on the hash parity.
    pub fn select_variant(&self, test: &ABTest, request_id: &str) -> String {
        let hash = stable_hash(&format!("{}:{request_id}", test.id));
        let in_test_traffic = (hash % 100) < u64::from(test.traffic_percent);
        if !in_test_traffic {
            return test.model_a.clone();
        }
        if (hash >> 7) % 2 == 0 {
            test.model_a.clone()
        } else {
            test.model_b.clone()
        }
    }

    pub async fn record_result(&self, test_id: Uuid, result: ABTestResult) -> Result<()> {
        let mut results = self.results.write().await;
        let Some(entries) = results.get_mut(&test_id) else {
            return Err(ForgeError::NotFound(format!("A/B test {test_id}")));
        };
        entries.push(result);
        Ok(())
    }

    pub async fn get_results(&self, test_id: Uuid) -> Result<AbTestAnalysis> {
        let test = self
            .tests
            .read()
            .await
            .get(&test_id)
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("A/B test {test_id}")))?;
        let results = self.results.read().await;
        let entries = results.get(&test_id).cloned().unwrap_or_default();

        let variant_a = Self::variant_stats(&entries, &test.model_a);
        let variant_b = Self::variant_stats(&entries, &test.model_b);

        let (z_score, winner) = Self::decide_winner(&test, &variant_a, &variant_b);
        Ok(AbTestAnalysis {
            test_id,
            model_a: test.model_a,
            model_b: test.model_b,
            variant_a,
            variant_b,
            z_score,
            winner,
        })
    }

    pub async fn end_test(&self, test_id: Uuid) -> Result<ABTest> {
        let mut tests = self.tests.write().await;
        let Some(test) = tests.get_mut(&test_id) else {
            return Err(ForgeError::NotFound(format!("A/B test {test_id}")));
        };
        test.status = ABTestStatus::Completed;
        test.ends_at = Some(chrono::Utc::now());
        info!(test_id = %test_id, "A/B test ended");
        Ok(test.clone())
    }

    fn variant_stats(entries: &[ABTestResult], model: &str) -> VariantStats {
        let samples: Vec<&ABTestResult> =
            entries.iter().filter(|r| r.variant == model).collect();
        let n = samples.len() as u64;
        if n == 0 {
            return VariantStats::default();
        }
        let successes = samples.iter().filter(|r| r.success).count() as u64;
        let qualities: Vec<f64> = samples.iter().filter_map(|r| r.quality).collect();
        VariantStats {
            samples: n,
            successes,
            success_rate: successes as f64 / n as f64,
            avg_duration_ms: samples.iter().map(|r| r.duration_ms as f64).sum::<f64>()
                / n as f64,
            avg_tokens: samples.iter().map(|r| r.tokens as f64).sum::<f64>() / n as f64,
            avg_cost: samples.iter().map(|r| r.cost_usd).sum::<f64>() / n as f64,
            avg_quality: if qualities.is_empty() {
                None
            } else {
                Some(qualities.iter().sum::<f64>() / qualities.len() as f64)
            },
        }
    }

    /// Two-proportion z-test on success rates. No winner below the sample
    /// floor or inside the confidence band.
    fn decide_winner(
        test: &ABTest,
        a: &VariantStats,
        b: &VariantStats,
    ) -> (Option<f64>, Option<String>) {
        if a.samples < test.min_samples || b.samples < test.min_samples {
            return (None, None);
        }
        let n_a = a.samples as f64;
        let n_b = b.samples as f64;
        let pooled = (a.successes + b.successes) as f64 / (n_a + n_b);
        let standard_error = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();
        if standard_error == 0.0 {
            // Identical, degenerate rates (all success or all failure).
            return (Some(0.0), None);
        }
        let z = (a.success_rate - b.success_rate) / standard_error;
        let winner = if z.abs() > constants::AB_WINNER_Z_THRESHOLD {
            if z > 0.0 {
                Some(test.model_a.clone())
            } else {
                Some(test.model_b.clone())
            }
        } else {
            None
        };
        if winner.is_none() {
            warn!(test_id = %test.id, z, "A/B test has no significant winner yet");
        }
        (Some(z), winner)
    }
}
