//! Common type definitions used throughout the engine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, GenerationConfig};

/// Conversation identifier owning a cached session snapshot
pub type OwnerId = i64;

/// Lifecycle state of the inference backend.
///
/// Exactly one value is current at a time; it only changes through the
/// backend's load/unload calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail")]
pub enum EngineStatus {
    Uninitialized,
    Idle,
    Loading(EngineConfig),
    Loaded(EngineConfig),
    Error(String),
}

impl EngineStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, EngineStatus::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, EngineStatus::Loading(_))
    }

    /// Configuration of the active or in-flight model, if any
    pub fn config(&self) -> Option<&EngineConfig> {
        match self {
            EngineStatus::Loading(config) | EngineStatus::Loaded(config) => Some(config),
            _ => None,
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Uninitialized => write!(f, "uninitialized"),
            EngineStatus::Idle => write!(f, "idle"),
            EngineStatus::Loading(config) => write!(f, "loading {}", config.model_path.display()),
            EngineStatus::Loaded(config) => write!(f, "loaded {}", config.model_path.display()),
            EngineStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Sampling parameters for one generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl From<&GenerationConfig> for SamplingParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_tokens: config.max_tokens,
        }
    }
}

/// Input to the backend's streaming generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub sampling: SamplingParams,
    pub stop_sequences: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, config: &GenerationConfig) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            sampling: SamplingParams::from(config),
            stop_sequences: config.stop_sequences.clone(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Why a generation ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    None,
    Eos,
    StopSequence,
    MaxTokens,
    Aborted,
    Error,
}

impl StopReason {
    /// Error outcomes leave the backend state inconsistent and must not be cached
    pub fn is_error(self) -> bool {
        matches!(self, StopReason::Error | StopReason::Aborted)
    }
}

/// Timing and token accounting reported with the terminal event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetrics {
    pub prompt_tokens: u32,
    pub generation_tokens: u32,
    pub ttfs_ms: f64,
    pub prefill_ms: f64,
    pub decode_ms: f64,
    pub total_ms: f64,
    pub tokens_per_second: f64,
    pub prompt_tps: f64,
    pub context_used_pct: f64,
    pub truncated: bool,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

impl GenerationMetrics {
    pub fn is_error(&self) -> bool {
        self.stop_reason.is_error()
    }
}

/// One item of a live generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Token(String),
    Terminal(GenerationMetrics),
}
