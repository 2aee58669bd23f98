//! Scriptable in-memory backend for unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{GenerationStream, InferenceBackend, StatusTracker};
use crate::{
    config::EngineConfig,
    engine::CancelToken,
    error::{EngineError, Result},
    types::{EngineStatus, GenerationEvent, GenerationMetrics, GenerationRequest, StopReason},
};

type CaptureHook = Arc<dyn Fn() + Send + Sync>;

/// Restored blobs starting with this prefix are rejected as corrupt
pub(crate) const CORRUPT_PREFIX: &[u8] = b"BAD";

#[derive(Debug, Clone)]
pub(crate) enum LoadScript {
    Succeed,
    Fail(String),
    /// Fail, then cancel the chain the way a user would between tiers
    FailAndCancel(String, CancelToken),
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Load(EngineConfig),
    Unload,
    Capture,
    Restore(usize),
    ClearState,
    Generate(String),
    Abort,
}

pub(crate) struct MockBackend {
    status: StatusTracker,
    loads: Mutex<VecDeque<LoadScript>>,
    calls: Mutex<Vec<Call>>,
    state: Mutex<Vec<u8>>,
    capture_error: Mutex<Option<String>>,
    capture_hook: Mutex<Option<CaptureHook>>,
    events: Mutex<Vec<GenerationEvent>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            status: StatusTracker::new(),
            loads: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(Vec::new()),
            capture_error: Mutex::new(None),
            capture_hook: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Queue load outcomes; once exhausted every load succeeds
    pub fn script_loads(&self, scripts: impl IntoIterator<Item = LoadScript>) {
        self.loads.lock().extend(scripts);
    }

    pub fn set_state(&self, bytes: Vec<u8>) {
        *self.state.lock() = bytes;
    }

    pub fn state(&self) -> Vec<u8> {
        self.state.lock().clone()
    }

    pub fn fail_captures(&self, reason: &str) {
        *self.capture_error.lock() = Some(reason.to_string());
    }

    /// Run `hook` inside every capture, after the state has been read
    pub fn on_capture(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.capture_hook.lock() = Some(Arc::new(hook));
    }

    pub fn script_generation(&self, tokens: &[&str], stop_reason: Option<StopReason>) {
        let mut events: Vec<GenerationEvent> = tokens
            .iter()
            .map(|t| GenerationEvent::Token(t.to_string()))
            .collect();
        if let Some(stop_reason) = stop_reason {
            events.push(GenerationEvent::Terminal(GenerationMetrics {
                generation_tokens: tokens.len() as u32,
                stop_reason,
                ..Default::default()
            }));
        }
        *self.events.lock() = events;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn loaded_configs(&self) -> Vec<EngineConfig> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Load(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn load(&self, config: &EngineConfig) -> Result<bool> {
        self.record(Call::Load(config.clone()));
        self.status.begin_loading(config);
        let script = self.loads.lock().pop_front().unwrap_or(LoadScript::Succeed);
        match script {
            LoadScript::Succeed => Ok(self.status.finish_loaded(config)),
            LoadScript::Fail(reason) => {
                self.status.fail(reason);
                Ok(false)
            }
            LoadScript::FailAndCancel(reason, token) => {
                self.status.fail(reason);
                token.cancel();
                Ok(false)
            }
            LoadScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(false)
            }
        }
    }

    async fn unload(&self) {
        self.record(Call::Unload);
        self.state.lock().clear();
        self.status.set_idle();
    }

    fn status(&self) -> EngineStatus {
        self.status.current()
    }

    fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    async fn capture_state(&self) -> Result<Vec<u8>> {
        self.record(Call::Capture);
        if let Some(reason) = self.capture_error.lock().clone() {
            return Err(EngineError::backend(reason));
        }
        let state = self.state.lock().clone();
        let hook = self.capture_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        Ok(state)
    }

    async fn restore_state(&self, state: &[u8]) -> Result<bool> {
        self.record(Call::Restore(state.len()));
        if state.starts_with(CORRUPT_PREFIX) {
            return Ok(false);
        }
        *self.state.lock() = state.to_vec();
        Ok(true)
    }

    async fn clear_state(&self) {
        self.record(Call::ClearState);
        self.state.lock().clear();
    }

    async fn generate_stream(&self, request: GenerationRequest) -> Result<GenerationStream> {
        self.record(Call::Generate(request.prompt.clone()));
        if !self.status.current().is_loaded() {
            return Err(EngineError::NotLoaded);
        }
        let events = self.events.lock().clone();
        // Generation mutates the session state the way a real KV cache would
        self.state.lock().extend_from_slice(request.prompt.as_bytes());
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn abort(&self) {
        self.record(Call::Abort);
    }
}
