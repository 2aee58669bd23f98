//! Turn and model-load metrics collection

mod collector;
mod types;

pub use collector::MetricsCollector;
pub use types::{LoadMetrics, MetricsSnapshot, TurnMetrics};
