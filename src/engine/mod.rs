//! Engine module providing the session coordinator and model loading

mod builder;
mod engine;
mod loader;

pub use builder::EngineBuilder;
pub use engine::{SessionEngine, TurnOutcome};
pub use loader::{fallback_candidates, CancelToken, FallbackTier, LoadOrchestrator, LoadReport, TierFailure};
