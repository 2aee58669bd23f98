use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::loader::{CancelToken, LoadOrchestrator, LoadReport};
use crate::{
    backend::{ConfigStore, InferenceBackend},
    cache::{CacheStats, CaptureOutcome, KvCacheStore},
    config::{EngineConfig, RuntimeConfig},
    error::{EngineError, Result},
    metrics::{MetricsCollector, MetricsSnapshot},
    reasoning::StreamClassifier,
    types::{EngineStatus, GenerationEvent, GenerationMetrics, GenerationRequest, OwnerId},
};

/// Main entry point: one model, one cache, any number of conversations.
///
/// Each turn restores the conversation's snapshot, streams the generation
/// through a fresh [`StreamClassifier`], and captures the snapshot again only
/// once the terminal event confirms a clean finish.
pub struct SessionEngine {
    pub(super) config: Arc<RuntimeConfig>,
    pub(super) backend: Arc<dyn InferenceBackend>,
    pub(super) config_store: Arc<dyn ConfigStore>,
    pub(super) loader: LoadOrchestrator,
    pub(super) cache: Arc<KvCacheStore>,
    pub(super) metrics: Arc<MetricsCollector>,
    /// One token per load call still in flight or queued
    pub(super) active_loads: Mutex<Vec<CancelToken>>,
}

/// Everything a caller learns from one conversational turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub visible: String,
    /// Reasoning text with markers intact
    pub reasoning: String,
    pub reasoning_chars: usize,
    pub reasoning_duration: Option<Duration>,
    /// Terminal metrics; `None` if the stream ended without a terminal event
    pub metrics: Option<GenerationMetrics>,
    /// Whether the turn resumed from a cached snapshot
    pub resumed: bool,
    /// Result of the post-turn capture; `None` when the turn failed
    pub capture: Option<CaptureOutcome>,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        self.metrics.as_ref().map(|m| !m.is_error()).unwrap_or(false)
    }
}

impl SessionEngine {
    /// Create a new engine builder
    pub fn builder() -> super::EngineBuilder {
        super::EngineBuilder::new()
    }

    /// Bring a model online, walking the fallback chain as needed.
    ///
    /// Long-running; call it from a task that does not block interaction.
    pub async fn load_model(&self, requested: EngineConfig) -> Result<LoadReport> {
        let token = CancelToken::new();
        self.active_loads.lock().push(token.clone());
        let result = self.loader.load_model_with_cancel(requested, &token).await;
        self.active_loads.lock().retain(|active| !active.is_same(&token));
        result
    }

    /// Reload the last configuration that loaded successfully, if any
    pub async fn load_stored_model(&self) -> Result<Option<LoadReport>> {
        match self.config_store.load()? {
            Some(stored) => {
                info!(model = %stored.model_path.display(), "Reloading stored engine config");
                self.load_model(stored).await.map(Some)
            }
            None => Ok(None),
        }
    }

    pub async fn unload(&self) {
        self.loader.unload().await;
        info!("Model unloaded");
    }

    /// Abort the in-flight generation and every pending fallback chain
    pub fn abort(&self) {
        self.backend.abort();
        for token in self.active_loads.lock().iter() {
            token.cancel();
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.backend.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.backend.subscribe_status()
    }

    pub fn cache(&self) -> &Arc<KvCacheStore> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Request with the configured sampling defaults
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        GenerationRequest::new(prompt, &self.config.generation)
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.cache.stats())
    }

    /// Run one conversational turn for `owner_id`.
    ///
    /// If no model is loaded, the last stored configuration is loaded first.
    /// Visible text is forwarded to `on_visible` as it streams. Only a
    /// missing or failed load or a generation that fails to start is
    /// returned as an error; cache and classifier faults are absorbed.
    pub async fn run_turn<F>(
        &self,
        owner_id: OwnerId,
        request: GenerationRequest,
        on_visible: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&str) + Send + 'static,
    {
        if !self.backend.status().is_loaded() {
            match self.load_stored_model().await? {
                Some(report) => info!(owner_id, tier = %report.tier, "Loaded stored model for turn"),
                None => return Err(EngineError::NotLoaded),
            }
        }

        let resumed = self.cache.restore_kv(owner_id).await;
        if !resumed {
            // Whatever the context holds belongs to another turn
            self.backend.clear_state().await;
        }
        debug!(owner_id, resumed, "Starting turn");

        let mut stream = match self.backend.generate_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(owner_id, error = %e, "Generation failed to start");
                self.cache.clear_kv(owner_id).await;
                self.metrics.record_turn(None, resumed, 0);
                return Err(e);
            }
        };

        let mut classifier = StreamClassifier::new(&self.config.reasoning).with_visible_callback(on_visible);
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            match event {
                GenerationEvent::Token(text) => classifier.handle(&text),
                GenerationEvent::Terminal(metrics) => {
                    terminal = Some(metrics);
                    break;
                }
            }
        }
        drop(stream);

        let classified = classifier.result();
        let capture = match &terminal {
            Some(metrics) if !metrics.is_error() => Some(self.cache.capture_kv(owner_id).await),
            Some(metrics) => {
                warn!(owner_id, stop_reason = ?metrics.stop_reason, "Turn ended in error, dropping snapshot");
                self.cache.clear_kv(owner_id).await;
                None
            }
            None => {
                warn!(owner_id, "Generation stream ended without a terminal event");
                self.cache.clear_kv(owner_id).await;
                None
            }
        };

        self.metrics.record_turn(terminal.as_ref(), resumed, classified.reasoning_chars);
        info!(
            owner_id,
            resumed,
            visible_chars = classified.visible.chars().count(),
            reasoning_chars = classified.reasoning_chars,
            stop_reason = ?terminal.as_ref().map(|m| m.stop_reason),
            "Turn complete"
        );

        Ok(TurnOutcome {
            visible: classified.visible,
            reasoning: classified.reasoning,
            reasoning_chars: classified.reasoning_chars,
            reasoning_duration: classified.reasoning_duration,
            metrics: terminal,
            resumed,
            capture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, LoadScript, MockBackend};
    use crate::backend::MemoryConfigStore;
    use crate::types::StopReason;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        engine: SessionEngine,
        backend: Arc<MockBackend>,
        store: Arc<MemoryConfigStore>,
        model: PathBuf,
        _dir: TempDir,
    }

    async fn create_test_engine() -> Fixture {
        let dir = tempdir().unwrap();
        let model = dir.path().join("model.gguf");
        std::fs::write(&model, vec![0u8; 2048]).unwrap();

        let mut config = RuntimeConfig::default();
        config.cache.directory = dir.path().join("kv");
        config.load.min_model_bytes = 1024;

        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryConfigStore::new());
        let engine = SessionEngine::builder()
            .with_config(config)
            .with_backend(backend.clone())
            .with_config_store(store.clone())
            .build()
            .await
            .unwrap();

        Fixture {
            engine,
            backend,
            store,
            model,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_turn_requires_loaded_model() {
        let f = create_test_engine().await;
        let result = f.engine.run_turn(1, f.engine.request("hi"), |_| {}).await;
        assert!(matches!(result, Err(EngineError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_successful_turn_captures_and_next_turn_resumes() {
        let f = create_test_engine().await;
        f.engine.load_model(EngineConfig::new(&f.model)).await.unwrap();
        f.backend.script_generation(
            &["Step 1 ", "<think>consid", "ering</think> answer"],
            Some(StopReason::Eos),
        );

        let streamed = Arc::new(Mutex::new(String::new()));
        let sink = streamed.clone();
        let outcome = f
            .engine
            .run_turn(1, f.engine.request("hello"), move |text| sink.lock().push_str(text))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert!(!outcome.resumed);
        assert_eq!(outcome.visible, "Step 1  answer");
        assert_eq!(*streamed.lock(), "Step 1  answer");
        assert_eq!(outcome.reasoning, "<think>considering</think>");
        assert_eq!(outcome.reasoning_chars, 11);
        assert!(outcome.capture.as_ref().unwrap().is_stored());

        let second = f.engine.run_turn(1, f.engine.request("again"), |_| {}).await.unwrap();
        assert!(second.resumed);
        let stats = f.engine.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_error_terminal_clears_instead_of_capturing() {
        let f = create_test_engine().await;
        f.engine.load_model(EngineConfig::new(&f.model)).await.unwrap();

        f.backend.script_generation(&["ok"], Some(StopReason::Eos));
        f.engine.run_turn(5, f.engine.request("first"), |_| {}).await.unwrap();
        assert!(f.engine.cache().contains(5).await);

        f.backend.script_generation(&["partial"], Some(StopReason::Error));
        let captures_before = f.backend.count(&Call::Capture);
        let outcome = f.engine.run_turn(5, f.engine.request("second"), |_| {}).await.unwrap();

        assert!(!outcome.is_success());
        assert!(outcome.capture.is_none());
        assert_eq!(f.backend.count(&Call::Capture), captures_before);
        assert!(!f.engine.cache().contains(5).await);
    }

    #[tokio::test]
    async fn test_stream_without_terminal_is_a_failure() {
        let f = create_test_engine().await;
        f.engine.load_model(EngineConfig::new(&f.model)).await.unwrap();
        f.backend.script_generation(&["cut", " off"], None);

        let outcome = f.engine.run_turn(2, f.engine.request("x"), |_| {}).await.unwrap();
        assert_eq!(outcome.visible, "cut off");
        assert!(outcome.metrics.is_none());
        assert!(!f.engine.cache().contains(2).await);

        let snapshot = f.engine.metrics_snapshot();
        assert_eq!(snapshot.turns.failed, 1);
    }

    #[tokio::test]
    async fn test_cache_miss_clears_backend_state() {
        let f = create_test_engine().await;
        f.engine.load_model(EngineConfig::new(&f.model)).await.unwrap();
        f.backend.set_state(b"other conversation".to_vec());
        f.backend.script_generation(&["hi"], Some(StopReason::Eos));

        f.engine.run_turn(9, f.engine.request("fresh"), |_| {}).await.unwrap();
        assert_eq!(f.backend.state(), b"fresh".to_vec());
    }

    #[tokio::test]
    async fn test_stored_config_reload() {
        let f = create_test_engine().await;
        assert!(f.engine.load_stored_model().await.unwrap().is_none());

        f.backend.script_loads([LoadScript::Fail("no vulkan".into()), LoadScript::Fail("no vulkan".into())]);
        let report = f
            .engine
            .load_model(EngineConfig::new(&f.model).with_gpu_layers(12))
            .await
            .unwrap();
        assert_eq!(report.config.gpu_layers, 0);

        let reloaded = f.engine.load_stored_model().await.unwrap().unwrap();
        assert_eq!(reloaded.config, report.config);
        assert!(f.engine.status().is_loaded());
    }

    #[tokio::test]
    async fn test_unload_and_abort() {
        let f = create_test_engine().await;
        f.engine.load_model(EngineConfig::new(&f.model)).await.unwrap();
        f.engine.abort();
        assert_eq!(f.backend.count(&Call::Abort), 1);

        f.engine.unload().await;
        assert_eq!(f.engine.status(), EngineStatus::Idle);
        f.store.clear().unwrap();
        let result = f.engine.run_turn(1, f.engine.request("hi"), |_| {}).await;
        assert!(matches!(result, Err(EngineError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_turn_loads_stored_model_when_needed() {
        let f = create_test_engine().await;
        let stored = EngineConfig::new(&f.model);
        f.store.save(&stored).unwrap();
        f.backend.script_generation(&["hi"], Some(StopReason::Eos));

        let outcome = f.engine.run_turn(1, f.engine.request("hello"), |_| {}).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.visible, "hi");
        assert_eq!(f.backend.loaded_configs(), vec![stored.clone()]);
        assert_eq!(f.engine.status(), EngineStatus::Loaded(stored));
    }

    #[tokio::test]
    async fn test_turn_propagates_stored_model_load_failure() {
        let f = create_test_engine().await;
        f.store.save(&EngineConfig::new(&f.model)).unwrap();
        f.backend.script_loads([LoadScript::Fail("out of memory".into())]);

        let result = f.engine.run_turn(1, f.engine.request("hello"), |_| {}).await;
        assert!(matches!(result, Err(EngineError::LoadFailed { .. })));
        assert_eq!(f.backend.count(&Call::Generate("hello".into())), 0);
    }

    #[tokio::test]
    async fn test_abort_cancels_every_queued_load() {
        let f = create_test_engine().await;
        let first = CancelToken::new();
        let second = CancelToken::new();
        f.engine.active_loads.lock().extend([first.clone(), second.clone()]);

        f.engine.abort();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(second.is_same(&second.clone()));
        assert!(!first.is_same(&second));
    }

    #[tokio::test]
    async fn test_finished_load_only_releases_its_own_token() {
        let f = create_test_engine().await;
        let other = CancelToken::new();
        f.engine.active_loads.lock().push(other.clone());

        f.engine.load_model(EngineConfig::new(&f.model)).await.unwrap();
        let remaining = f.engine.active_loads.lock().clone();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_same(&other));

        f.engine.abort();
        assert!(other.is_cancelled());
    }
}
