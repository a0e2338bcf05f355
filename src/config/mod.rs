use crate::{constants, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub llm: LlmConfig,
    pub classifier: ClassifierConfig,
    pub github: GitHubConfig,
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    /// Cheap-tier default used by the single-shot strategy and as the
    /// selector's last resort.
    pub default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub service_url: String,
    pub timeout_secs: u64,
    /// Bot identity used as owner/repo when the core opens pull requests.
    pub bot_owner: String,
    pub bot_repo: String,
    pub base_branch: String,
    pub draft_pull_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub max_parallel_coders: usize,
    pub iterative_max_iterations: u32,
    pub iterative_timeout_secs: u64,
    pub performance_min_samples: u64,
    pub ab_default_traffic_percent: u8,
    pub registry_refresh_ttl_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(_) => tracing::debug!("No .env file found, using process environment"),
        }

        let api = ApiConfig {
            host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("API_PORT", 3000),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let llm = LlmConfig {
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            default_model: env::var("LLM_DEFAULT_MODEL")
                .unwrap_or_else(|_| constants::DEFAULT_MODEL.to_string()),
        };

        let classifier = ClassifierConfig {
            base_url: env::var("ML_CLASSIFIER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout_ms: env_or("ML_CLASSIFIER_TIMEOUT_MS", constants::CLASSIFIER_TIMEOUT_MS),
        };

        let github = GitHubConfig {
            service_url: env::var("GITHUB_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            timeout_secs: env_or("GITHUB_TIMEOUT_SECS", constants::GITHUB_TIMEOUT_SECS),
            bot_owner: env::var("GITHUB_BOT_OWNER").unwrap_or_else(|_| "coding-agent".to_string()),
            bot_repo: env::var("GITHUB_BOT_REPO").unwrap_or_else(|_| "coding-agent".to_string()),
            base_branch: env::var("GITHUB_BASE_BRANCH").unwrap_or_else(|_| "main".to_string()),
            draft_pull_requests: env_or("GITHUB_DRAFT_PRS", true),
        };

        let orchestration = OrchestrationConfig {
            max_parallel_coders: env_or("ORCH_MAX_PARALLEL_CODERS", constants::MAX_PARALLEL_CODERS),
            iterative_max_iterations: env_or(
                "ORCH_ITERATIVE_MAX_ITERATIONS",
                constants::ITERATIVE_MAX_ITERATIONS,
            ),
            iterative_timeout_secs: env_or(
                "ORCH_ITERATIVE_TIMEOUT_SECS",
                constants::ITERATIVE_TIMEOUT_SECS,
            ),
            performance_min_samples: env_or(
                "ORCH_PERFORMANCE_MIN_SAMPLES",
                constants::PERFORMANCE_MIN_SAMPLES,
            ),
            ab_default_traffic_percent: env_or(
                "ORCH_AB_DEFAULT_TRAFFIC_PERCENT",
                constants::AB_DEFAULT_TRAFFIC_PERCENT,
            )
            .min(100),
            registry_refresh_ttl_secs: env_or(
                "ORCH_REGISTRY_REFRESH_TTL_SECS",
                constants::REGISTRY_REFRESH_TTL_SECS,
            ),
        };

        let config = Config {
            api,
            llm,
            classifier,
            github,
            orchestration,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.orchestration.max_parallel_coders == 0 {
            return Err(crate::ForgeError::Configuration(
                "ORCH_MAX_PARALLEL_CODERS must be at least 1".to_string(),
            ));
        }
        if self.orchestration.iterative_max_iterations == 0 {
            return Err(crate::ForgeError::Configuration(
                "ORCH_ITERATIVE_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    /// What `load()` produces in an empty environment. Tests build on
    /// this instead of touching env vars.
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            llm: LlmConfig {
                base_url: "https://api.openai.com".to_string(),
                api_key: String::new(),
                default_model: constants::DEFAULT_MODEL.to_string(),
            },
            classifier: ClassifierConfig {
                base_url: "http://localhost:8001".to_string(),
                timeout_ms: constants::CLASSIFIER_TIMEOUT_MS,
            },
            github: GitHubConfig {
                service_url: "http://localhost:8002".to_string(),
                timeout_secs: constants::GITHUB_TIMEOUT_SECS,
                bot_owner: "coding-agent".to_string(),
                bot_repo: "coding-agent".to_string(),
                base_branch: "main".to_string(),
                draft_pull_requests: true,
            },
            orchestration: OrchestrationConfig {
                max_parallel_coders: constants::MAX_PARALLEL_CODERS,
                iterative_max_iterations: constants::ITERATIVE_MAX_ITERATIONS,
                iterative_timeout_secs: constants::ITERATIVE_TIMEOUT_SECS,
                performance_min_samples: constants::PERFORMANCE_MIN_SAMPLES,
                ab_default_traffic_percent: constants::AB_DEFAULT_TRAFFIC_PERCENT,
                registry_refresh_ttl_secs: constants::REGISTRY_REFRESH_TTL_SECS,
            },
        }
    }
}
