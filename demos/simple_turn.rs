//! Two turns against a toy backend: the second resumes from the snapshot
//! captured after the first.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use session_engine::{
    backend::GenerationStream,
    config::{EngineConfig, RuntimeConfig},
    utils::{setup_logging, LogConfig},
    EngineStatus, GenerationEvent, GenerationMetrics, GenerationRequest, InferenceBackend,
    SessionEngine, StatusTracker, StopReason,
};
use tokio::sync::watch;
use tracing::info;

/// Echoes the prompt back with a short reasoning span in front
struct EchoBackend {
    status: StatusTracker,
    context: Mutex<Vec<u8>>,
}

#[async_trait]
impl InferenceBackend for EchoBackend {
    async fn load(&self, config: &EngineConfig) -> session_engine::Result<bool> {
        self.status.begin_loading(config);
        Ok(self.status.finish_loaded(config))
    }

    async fn unload(&self) {
        self.context.lock().clear();
        self.status.set_idle();
    }

    fn status(&self) -> EngineStatus {
        self.status.current()
    }

    fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    async fn capture_state(&self) -> session_engine::Result<Vec<u8>> {
        Ok(self.context.lock().clone())
    }

    async fn restore_state(&self, state: &[u8]) -> session_engine::Result<bool> {
        *self.context.lock() = state.to_vec();
        Ok(true)
    }

    async fn clear_state(&self) {
        self.context.lock().clear();
    }

    async fn generate_stream(&self, request: GenerationRequest) -> session_engine::Result<GenerationStream> {
        let started = Instant::now();
        let history = {
            let mut context = self.context.lock();
            context.extend_from_slice(request.prompt.as_bytes());
            context.len()
        };

        let mut events: Vec<GenerationEvent> = ["<thi", "nk>echo it", "</think>", "You said: "]
            .iter()
            .map(|t| GenerationEvent::Token(t.to_string()))
            .collect();
        let words: Vec<&str> = request.prompt.split_whitespace().collect();
        for word in &words {
            events.push(GenerationEvent::Token(format!("{} ", word)));
        }
        events.push(GenerationEvent::Terminal(GenerationMetrics {
            prompt_tokens: history as u32,
            generation_tokens: words.len() as u32 + 4,
            total_ms: started.elapsed().as_secs_f64() * 1000.0,
            stop_reason: StopReason::Eos,
            ..Default::default()
        }));
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn abort(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(LogConfig::default()).map_err(anyhow::Error::msg)?;

    let dir = tempfile::tempdir()?;
    let model_path = dir.path().join("toy.gguf");
    std::fs::write(&model_path, vec![0u8; 2 * 1024 * 1024])?;

    let mut config = RuntimeConfig::default();
    config.cache.directory = dir.path().join("kv");

    let backend = Arc::new(EchoBackend {
        status: StatusTracker::new(),
        context: Mutex::new(Vec::new()),
    });
    let engine = SessionEngine::builder()
        .with_config(config)
        .with_backend(backend)
        .build()
        .await?;

    let report = engine.load_model(EngineConfig::new(&model_path).with_gpu_layers(20)).await?;
    info!(tier = %report.tier, "{}", report.message);

    for prompt in ["hello there", "tell me more"] {
        let outcome = engine
            .run_turn(1, engine.request(prompt), |text| print!("{}", text))
            .await?;
        println!();
        info!(
            resumed = outcome.resumed,
            reasoning = %outcome.reasoning,
            reasoning_chars = outcome.reasoning_chars,
            "Turn finished"
        );
    }

    let snapshot = engine.metrics_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot.cache)?);
    Ok(())
}
