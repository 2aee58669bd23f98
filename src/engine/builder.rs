use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::engine::SessionEngine;
use super::loader::LoadOrchestrator;
use crate::{
    backend::{ConfigStore, InferenceBackend, MemoryConfigStore},
    cache::KvCacheStore,
    config::RuntimeConfig,
    error::{EngineError, Result},
    metrics::MetricsCollector,
};

/// Builder for constructing a SessionEngine instance
pub struct EngineBuilder {
    config: Option<RuntimeConfig>,
    backend: Option<Arc<dyn InferenceBackend>>,
    config_store: Option<Arc<dyn ConfigStore>>,
}

impl EngineBuilder {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            config_store: None,
        }
    }

    /// Set the runtime configuration
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the inference backend. Required.
    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Where the last good engine configuration is persisted.
    /// Defaults to an in-memory store.
    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    /// Build the engine instance
    pub async fn build(self) -> Result<SessionEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let backend = self
            .backend
            .ok_or_else(|| EngineError::configuration("backend", "an inference backend is required"))?;
        let config_store = self
            .config_store
            .unwrap_or_else(|| Arc::new(MemoryConfigStore::new()));

        let config = Arc::new(config);
        let metrics = Arc::new(MetricsCollector::new(&config.monitoring));
        let cache = Arc::new(KvCacheStore::open(config.cache.clone(), backend.clone()).await?);

        let loader = LoadOrchestrator::new(backend.clone(), config_store.clone(), config.load.clone())
            .with_cache(cache.clone())
            .with_metrics(metrics.clone());

        info!(
            cache_dir = %config.cache.directory.display(),
            max_files = config.cache.max_files,
            max_bytes = config.cache.max_bytes,
            "Session engine ready"
        );

        Ok(SessionEngine {
            config,
            backend,
            config_store,
            loader,
            cache,
            metrics,
            active_loads: Mutex::new(Vec::new()),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
