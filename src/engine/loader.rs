// Location: src/engine/loader.rs

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    backend::{ConfigStore, InferenceBackend},
    cache::KvCacheStore,
    config::{EngineConfig, LoadConfig},
    error::{EngineError, ErrorExt, Result},
    metrics::MetricsCollector,
    types::EngineStatus,
};

/// One step of the hardware fallback chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FallbackTier {
    /// The configuration exactly as requested
    Primary,
    /// Requested configuration with half the accelerator layers
    ReducedAcceleration,
    /// Accelerator disabled entirely
    CpuOnly,
}

impl FallbackTier {
    pub fn name(&self) -> &'static str {
        match self {
            FallbackTier::Primary => "primary",
            FallbackTier::ReducedAcceleration => "reduced-acceleration",
            FallbackTier::CpuOnly => "cpu-only",
        }
    }
}

impl fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed attempt on one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: FallbackTier,
    pub config: EngineConfig,
    pub reason: String,
}

/// Successful load and how it was reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub tier: FallbackTier,
    pub config: EngineConfig,
    pub message: String,
    /// Failures of the tiers tried before `tier`
    pub attempts: Vec<TierFailure>,
}

/// Cooperative cancellation for a fallback chain.
///
/// Checked before the first tier and between tiers; an attempt already
/// running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether both handles control the same chain
    pub fn is_same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// Ordered candidates for a requested configuration, duplicates removed
pub fn fallback_candidates(requested: &EngineConfig) -> Vec<(FallbackTier, EngineConfig)> {
    let mut candidates = vec![(FallbackTier::Primary, requested.clone())];

    if requested.use_acceleration && requested.gpu_layers > 1 {
        let reduced = EngineConfig {
            gpu_layers: requested.gpu_layers / 2,
            ..requested.clone()
        };
        candidates.push((FallbackTier::ReducedAcceleration, reduced));
    }

    let cpu = requested.cpu_only();
    if !candidates.iter().any(|(_, config)| *config == cpu) {
        candidates.push((FallbackTier::CpuOnly, cpu));
    }

    candidates
}

/// Brings a model online by walking the fallback chain.
///
/// The only component that decides which configuration becomes active.
/// Loads are serialized; a second request waits for the first chain.
pub struct LoadOrchestrator {
    backend: Arc<dyn InferenceBackend>,
    config_store: Arc<dyn ConfigStore>,
    cache: Option<Arc<KvCacheStore>>,
    metrics: Option<Arc<MetricsCollector>>,
    load_config: LoadConfig,
    load_lock: Mutex<()>,
}

impl LoadOrchestrator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        config_store: Arc<dyn ConfigStore>,
        load_config: LoadConfig,
    ) -> Self {
        Self {
            backend,
            config_store,
            cache: None,
            metrics: None,
            load_config,
            load_lock: Mutex::new(()),
        }
    }

    /// Invalidate this cache whenever the loaded model changes
    pub fn with_cache(mut self, cache: Arc<KvCacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn load_model(&self, requested: EngineConfig) -> Result<LoadReport> {
        self.load_model_with_cancel(requested, &CancelToken::new()).await
    }

    pub async fn load_model_with_cancel(
        &self,
        requested: EngineConfig,
        cancel: &CancelToken,
    ) -> Result<LoadReport> {
        let _guard = self.load_lock.lock().await;

        requested.validate()?;
        self.validate_model_file(&requested.model_path).await?;

        let mut failures: Vec<TierFailure> = Vec::new();
        for (tier, candidate) in fallback_candidates(&requested) {
            if cancel.is_cancelled() {
                info!(next_tier = %tier, "Model load cancelled");
                return Err(EngineError::Cancelled {
                    operation: "load_model".to_string(),
                });
            }

            info!(
                %tier,
                gpu_layers = candidate.gpu_layers,
                accelerated = candidate.use_acceleration,
                threads = candidate.thread_count,
                "Attempting model load"
            );
            self.reset_backend().await;

            match self.attempt(&candidate).await {
                Ok(()) => {
                    self.record_attempt(tier, true);
                    if let Err(e) = self.config_store.save(&candidate) {
                        warn!(error = %e, "Loaded model but failed to persist its configuration");
                    }
                    let message = success_message(tier, &requested, &candidate);
                    info!(%tier, %message, "Model loaded");
                    return Ok(LoadReport {
                        tier,
                        config: candidate,
                        message,
                        attempts: failures,
                    });
                }
                Err(e) if !e.advances_fallback() => return Err(e),
                Err(e) => {
                    self.record_attempt(tier, false);
                    warn!(%tier, reason = %e, "Model load attempt failed");
                    failures.push(TierFailure {
                        tier,
                        config: candidate,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_load_exhausted();
        }
        let message = failure_message(&requested, &failures);
        error!(%message, "All fallback tiers failed");
        Err(EngineError::LoadFailed {
            message,
            attempts: failures,
        })
    }

    /// Unload the active model and logically drop every cached session
    pub async fn unload(&self) {
        let _guard = self.load_lock.lock().await;
        self.reset_backend().await;
    }

    async fn attempt(&self, candidate: &EngineConfig) -> Result<()> {
        let timeout = self.load_config.timeout;
        let loaded = match tokio::time::timeout(timeout, self.backend.load(candidate)).await {
            Ok(result) => result?,
            Err(_) => {
                self.backend.unload().await;
                return Err(EngineError::Timeout {
                    operation: "load".to_string(),
                    duration: timeout,
                });
            }
        };

        match self.backend.status() {
            EngineStatus::Loaded(active) if loaded && active == *candidate => Ok(()),
            EngineStatus::Error(reason) => Err(EngineError::backend(reason)),
            other if loaded => Err(EngineError::backend(format!(
                "load reported success but backend is {}",
                other
            ))),
            _ => Err(EngineError::backend("backend rejected the configuration")),
        }
    }

    async fn reset_backend(&self) {
        match self.backend.status() {
            EngineStatus::Uninitialized | EngineStatus::Idle => {}
            _ => {
                self.backend.clear_state().await;
                self.backend.unload().await;
            }
        }
        if let Some(cache) = &self.cache {
            cache.invalidate();
        }
    }

    async fn validate_model_file(&self, path: &Path) -> Result<()> {
        let invalid = |reason: String| EngineError::InvalidModel {
            path: path.to_path_buf(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| invalid(format!("cannot read model file: {}", e)))?;
        if !metadata.is_file() {
            return Err(invalid("not a regular file".to_string()));
        }
        if metadata.len() <= self.load_config.min_model_bytes {
            return Err(invalid(format!(
                "file is {} bytes, expected more than {}",
                metadata.len(),
                self.load_config.min_model_bytes
            )));
        }
        Ok(())
    }

    fn record_attempt(&self, tier: FallbackTier, succeeded: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_load_attempt(tier.name(), succeeded);
        }
    }
}

fn model_name(config: &EngineConfig) -> String {
    config
        .model_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.model_path.display().to_string())
}

fn success_message(tier: FallbackTier, requested: &EngineConfig, active: &EngineConfig) -> String {
    let model = model_name(active);
    match tier {
        FallbackTier::Primary if active.is_accelerated() => {
            format!("Loaded {} with {} GPU layers", model, active.gpu_layers)
        }
        FallbackTier::Primary => format!("Loaded {} on CPU", model),
        FallbackTier::ReducedAcceleration => format!(
            "Loaded {} with reduced GPU offload ({} of {} layers) after the requested configuration failed",
            model, active.gpu_layers, requested.gpu_layers
        ),
        FallbackTier::CpuOnly => format!(
            "Loaded {} using CPU-only execution because GPU acceleration failed",
            model
        ),
    }
}

fn failure_message(requested: &EngineConfig, failures: &[TierFailure]) -> String {
    let reasons = failures
        .iter()
        .map(|f| format!("{}: {}", f.tier, f.reason))
        .collect::<Vec<_>>()
        .join("; ");
    format!("Failed to load {}: {}", model_name(requested), reasons)
}
