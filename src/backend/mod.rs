//! Inference and configuration-persistence collaborators.
//!
//! The engine never decodes weights or samples tokens itself. Everything it
//! needs from the model runtime goes through [`InferenceBackend`], and the
//! last successfully loaded [`EngineConfig`] is persisted through a
//! [`ConfigStore`].

mod status;
mod store;

#[cfg(test)]
pub(crate) mod mock;

pub use status::StatusTracker;
pub use store::{ConfigStore, JsonConfigStore, MemoryConfigStore};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::watch;

use crate::{
    config::EngineConfig,
    error::Result,
    types::{EngineStatus, GenerationEvent, GenerationRequest},
};

/// Live token stream produced by a generation
pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// Narrow interface to the model runtime.
///
/// Implementations publish status transitions (usually through a
/// [`StatusTracker`]) and must use interior mutability, since a single
/// backend is shared by the load orchestrator, the cache store and the
/// session coordinator.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Load a model. Returns `Ok(false)` when the runtime rejected the
    /// configuration; the reason is then carried by [`EngineStatus::Error`].
    async fn load(&self, config: &EngineConfig) -> Result<bool>;

    /// Release the current model, if any
    async fn unload(&self);

    /// Current status value
    fn status(&self) -> EngineStatus;

    /// Receiver observing every status transition
    fn subscribe_status(&self) -> watch::Receiver<EngineStatus>;

    /// Serialize the current session (KV) state
    async fn capture_state(&self) -> Result<Vec<u8>>;

    /// Restore a previously captured session state. `Ok(false)` means the
    /// blob was rejected as corrupt or incompatible.
    async fn restore_state(&self, state: &[u8]) -> Result<bool>;

    /// Drop the in-memory session state of the loaded model
    async fn clear_state(&self);

    /// Start a streaming generation
    async fn generate_stream(&self, request: GenerationRequest) -> Result<GenerationStream>;

    /// Abort token production of the in-flight generation
    fn abort(&self);
}
