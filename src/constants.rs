//! System-wide constants: retry budgets, breaker thresholds, and strategy
//! limits. Values that operators are expected to tune live in `config`
//! instead; these are the fixed protocol numbers.

// Outbound client resilience
/// ML classifier calls are on the strategy-selection hot path; two quick
/// attempts with a tight per-call budget keep selection under its latency
/// target.
pub const CLASSIFIER_RETRY_ATTEMPTS: u32 = 2;
pub const CLASSIFIER_RETRY_BASE_MS: u64 = 50;
pub const CLASSIFIER_TIMEOUT_MS: u64 = 100;

/// GitHub PR creation is best-effort and off the hot path, so it gets a
/// roomier budget.
pub const GITHUB_RETRY_ATTEMPTS: u32 = 3;
pub const GITHUB_RETRY_BASE_MS: u64 = 200;
pub const GITHUB_TIMEOUT_SECS: u64 = 5;

/// Breaker opens after this many consecutive failures and probes again
/// after the cooldown.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 3;
pub const BREAKER_COOLDOWN_SECS: u64 = 30;

// Strategy limits
pub const ITERATIVE_MAX_ITERATIONS: u32 = 3;
pub const ITERATIVE_TIMEOUT_SECS: u64 = 60;
pub const MAX_PARALLEL_CODERS: usize = 3;

pub const SINGLE_SHOT_TEMPERATURE: f32 = 0.3;
pub const SINGLE_SHOT_MAX_TOKENS: u32 = 4000;
pub const AGENT_TEMPERATURE: f32 = 0.2;
pub const AGENT_MAX_TOKENS: u32 = 4000;

/// Whole-parse budget for LLM output parsing. The regex engine is
/// linear-time, but pathological inputs still get a hard ceiling.
pub const PARSER_TIMEOUT_SECS: u64 = 2;

// Selection
/// Strategy selection should finish inside this budget when the classifier
/// answers in time; exceeding it is logged, not enforced.
pub const STRATEGY_SELECT_BUDGET_MS: u64 = 100;
pub const HEURISTIC_COMPLEX_WORD_COUNT: usize = 100;
pub const HEURISTIC_SIMPLE_WORD_COUNT: usize = 20;

/// Fallback model when neither A/B tests, performance data, nor the
/// preference lists produce a usable choice.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Planner, reviewer and tester need the large tier regardless of what the
/// coder runs on.
pub const PLANNER_MODEL: &str = "gpt-4o";
pub const REVIEWER_MODEL: &str = "gpt-4o";
pub const TESTER_MODEL: &str = "gpt-4o";

// Aggregates
pub const PERFORMANCE_MIN_SAMPLES: u64 = 30;
pub const AB_TEST_MIN_SAMPLES: u64 = 30;
/// Two-sided 95% confidence bound for A/B winner declaration.
pub const AB_WINNER_Z_THRESHOLD: f64 = 1.96;
pub const AB_DEFAULT_TRAFFIC_PERCENT: u8 = 100;

pub const REGISTRY_REFRESH_TTL_SECS: u64 = 300;

// Log streaming
/// Late subscribers replay at least this many buffered lines.
pub const LOG_REPLAY_CAPACITY: usize = 256;
pub const LOG_CHANNEL_CAPACITY: usize = 1024;

// Feedback
pub const FEEDBACK_SIGNIFICANCE_DELTA: f64 = 0.2;
pub const RETRAIN_MIN_SAMPLES: u64 = 1000;

// API paging
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
