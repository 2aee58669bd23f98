// Location: src/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::reasoning::MarkerPair;

/// Hardware/runtime parameters for a single model load attempt.
///
/// Immutable once built; a load attempt is fully determined by this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Path to the model weights
    pub model_path: PathBuf,

    /// Number of CPU threads used for decode and prefill
    pub thread_count: u32,

    /// Context window in tokens
    pub context_length: u32,

    /// Number of layers offloaded to the accelerator
    pub gpu_layers: u32,

    /// Whether the accelerator should be used at all
    pub use_acceleration: bool,
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Default::default()
        }
    }

    pub fn with_gpu_layers(mut self, gpu_layers: u32) -> Self {
        self.gpu_layers = gpu_layers;
        self.use_acceleration = gpu_layers > 0;
        self
    }

    pub fn with_threads(mut self, thread_count: u32) -> Self {
        self.thread_count = thread_count;
        self
    }

    pub fn with_context_length(mut self, context_length: u32) -> Self {
        self.context_length = context_length;
        self
    }

    /// Same configuration with the accelerator disabled
    pub fn cpu_only(&self) -> Self {
        Self {
            gpu_layers: 0,
            use_acceleration: false,
            ..self.clone()
        }
    }

    /// Whether this configuration actually offloads anything
    pub fn is_accelerated(&self) -> bool {
        self.use_acceleration && self.gpu_layers > 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(EngineError::configuration("model_path", "Model path cannot be empty"));
        }
        if self.thread_count == 0 {
            return Err(EngineError::configuration("thread_count", "Thread count must be at least 1"));
        }
        if self.context_length == 0 {
            return Err(EngineError::configuration("context_length", "Context length must be positive"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            thread_count: 4,
            context_length: 4096,
            gpu_layers: 0,
            use_acceleration: false,
        }
    }
}

/// Process-wide runtime settings for the session engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub load: LoadConfig,
    pub reasoning: ReasoningConfig,
    pub generation: GenerationConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one snapshot file per conversation
    pub directory: PathBuf,

    /// Maximum number of cached conversations
    pub max_files: usize,

    /// Maximum total size of cached snapshots
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Per-tier load timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Files at or below this size are rejected before any load attempt
    pub min_model_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Recognized start/end marker pairs
    pub markers: Vec<MarkerPair>,

    /// Consecutive scan faults tolerated before degrading to pass-through
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate
    pub max_tokens: u32,

    /// Temperature for sampling
    pub temperature: f32,

    /// Top-p sampling threshold
    pub top_p: f32,

    /// Top-k sampling
    pub top_k: u32,

    /// Sequences that end generation
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Whether to collect turn/load metrics
    pub enable_metrics: bool,

    /// Log level
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("session-engine").join("kv"),
            max_files: 8,
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            min_model_bytes: 1024 * 1024,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            markers: MarkerPair::defaults(),
            max_consecutive_errors: 5,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.8,
            top_p: 0.9,
            top_k: 40,
            stop_sequences: Vec::new(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_level: LogLevel::Info,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_files == 0 {
            return Err(EngineError::configuration("cache.max_files", "must be at least 1"));
        }
        if self.cache.max_bytes == 0 {
            return Err(EngineError::configuration("cache.max_bytes", "must be positive"));
        }
        if self.cache.directory.as_os_str().is_empty() {
            return Err(EngineError::configuration("cache.directory", "cannot be empty"));
        }
        if self.load.timeout.is_zero() {
            return Err(EngineError::configuration("load.timeout", "must be positive"));
        }
        if self.reasoning.markers.iter().any(|m| m.start.is_empty() || m.end.is_empty()) {
            return Err(EngineError::configuration(
                "reasoning.markers",
                "start and end markers must be non-empty",
            ));
        }
        if self.reasoning.max_consecutive_errors == 0 {
            return Err(EngineError::configuration(
                "reasoning.max_consecutive_errors",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.generation.top_p) {
            return Err(EngineError::configuration("generation.top_p", "must be between 0 and 1"));
        }
        if self.generation.max_tokens == 0 {
            return Err(EngineError::configuration("generation.max_tokens", "must be at least 1"));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|e| {
            serde::de::Error::custom(format!("invalid duration of {} seconds: {}", secs, e))
        })
    }
}
