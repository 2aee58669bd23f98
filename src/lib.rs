//! Session Engine - on-device conversational LLM session runtime
//!
//! This crate sits between a chat front end and a local inference backend.
//! It brings a model online through a hardware fallback chain, persists each
//! conversation's KV state in a bounded LRU snapshot cache so later turns skip
//! re-processing history, and splits the streamed output into visible text
//! and reasoning spans.
//!
//! The backend itself is supplied by the caller through
//! [`backend::InferenceBackend`].

use std::fmt;

// Public modules
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod reasoning;
pub mod types;
pub mod utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_RUST_VERSION: &str = "1.70.0";

// Re-exports for public API
pub use backend::{ConfigStore, InferenceBackend, JsonConfigStore, MemoryConfigStore, StatusTracker};
pub use cache::{CacheStats, CaptureOutcome, KvCacheStore};
pub use config::{EngineConfig, RuntimeConfig};
pub use engine::{CancelToken, EngineBuilder, FallbackTier, LoadReport, SessionEngine, TurnOutcome};
pub use error::{EngineError, Result};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use reasoning::{ClassifiedOutput, MarkerPair, StreamClassifier};
pub use types::{EngineStatus, GenerationEvent, GenerationMetrics, GenerationRequest, OwnerId, StopReason};

/// Build-time summary, handy in startup logs
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub debug_assertions: bool,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            debug_assertions: cfg!(debug_assertions),
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-engine {}", self.version)?;
        if self.debug_assertions {
            write!(f, " (debug)")?;
        }
        Ok(())
    }
}
