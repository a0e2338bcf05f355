//! Model registry: discovers models from configured providers and caches
//! the merged view with a TTL.

use crate::{
    models::{ModelCapability, ModelInfo},
    Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outbound seam to one model provider's listing endpoint.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}

#[derive(Default)]
struct RegistryCache {
    models: HashMap<String, ModelInfo>,
    refreshed_at: Option<Instant>,
}

/// In-memory model registry with TTL-gated refresh.
///
/// Refreshes merge every configured provider's listing with the static
/// default cloud set; a provider failure is logged and skipped so the
/// registry stays usable with partial results. A single-flight lock keeps
/// concurrent refreshes from stampeding providers.
pub struct ModelRegistry {
    providers: Vec<Arc<dyn ModelProvider>>,
    cache: RwLock<RegistryCache>,
    refresh_lock: Mutex<()>,
    ttl: Duration,
}

impl ModelRegistry {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            providers: Vec::new(),
            cache: RwLock::new(RegistryCache::default()),
            refresh_lock: Mutex::new(()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub async fn list(&self) -> Vec<ModelInfo> {
        self.ensure_fresh().await;
        let cache = self.cache.read().await;
        let mut models: Vec<ModelInfo> = cache.models.values().cloned().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    pub async fn list_by_provider(&self, provider: &str) -> Vec<ModelInfo> {
        self.list()
            .await
            .into_iter()
            .filter(|m| m.provider == provider)
            .collect()
    }

    pub async fn is_available(&self, name: &str) -> bool {
        self.ensure_fresh().await;
        let cache = self.cache.read().await;
        cache.models.get(name).map(|m| m.available).unwrap_or(false)
    }

    /// Forces a refresh regardless of TTL.
    pub async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await;
    }

    async fn ensure_fresh(&self) {
        let stale = {
            let cache = self.cache.read().await;
            match cache.refreshed_at {
                Some(at) => at.elapsed() >= self.ttl,
                None => true,
            }
        };
        if !stale {
            return;
        }

        let _guard = self.refresh_lock.lock().await;
        // Re-check under the lock: another caller may have refreshed while
        // we waited.
        let still_stale = {
            let cache = self.cache.read().await;
            match cache.refreshed_at {
                Some(at) => at.elapsed() >= self.ttl,
                None => true,
            }
        };
        if still_stale {
            self.refresh_locked().await;
        }
    }

    async fn refresh_locked(&self) {
        debug!(providers = self.providers.len(), "Refreshing model registry");
        let mut merged: HashMap<String, ModelInfo> = default_cloud_models()
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        for provider in &self.providers {
            match provider.list_models().await {
                Ok(models) => {
                    for model in models {
                        merged.insert(model.name.clone(), model);
                    }
                }
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        error = %e,
                        "Provider listing failed, keeping previous entries"
                    );
                }
            }
        }

        let mut cache = self.cache.write().await;
        cache.models = merged;
        cache.refreshed_at = Some(Instant::now());
        info!(models = cache.models.len(), "Model registry refreshed");
    }
}

/// Static default cloud model set; always flagged available so the core
/// keeps working when no provider is configured.
pub fn default_cloud_models() -> Vec<ModelInfo> {
    let now = chrono::Utc::now();
    let entry = |name: &str, provider: &str, display: &str| ModelInfo {
        name: name.to_string(),
        provider: provider.to_string(),
        display_name: display.to_string(),
        capabilities: vec![ModelCapability::All],
        available: true,
        last_updated: now,
    };
    vec![
        entry("gpt-4o", "openai", "GPT-4o"),
        entry("gpt-4o-mini", "openai", "GPT-4o mini"),
        entry("gpt-4-turbo", "openai", "GPT-4 Turbo"),
        entry("claude-3-5-sonnet", "anthropic", "Claude 3.5 Sonnet"),
        entry("claude-3-haiku", "anthropic", "Claude 3 Haiku"),
    ]
}
