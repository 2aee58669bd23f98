use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;

/// Snapshot of engine metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// When these metrics were collected
    pub timestamp: std::time::SystemTime,

    /// Time since the collector was created
    pub uptime: Duration,

    /// Turn metrics
    pub turns: TurnMetrics,

    /// Model load metrics
    pub loads: LoadMetrics,

    /// Session cache counters
    pub cache: CacheStats,
}

/// Conversational turn metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Turns that ended with a non-error terminal event
    pub completed: u64,

    /// Turns that ended in error, abort or without a terminal event
    pub failed: u64,

    /// Turns that resumed from a cached snapshot
    pub cache_resumed: u64,

    /// Total generated tokens
    pub generated_tokens: u64,

    /// Total reasoning characters, markers excluded
    pub reasoning_chars: u64,

    /// Average decode throughput over completed turns
    pub average_tokens_per_second: f64,
}

/// Model load metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadMetrics {
    /// Load attempts per fallback tier name
    pub attempts_by_tier: Vec<(String, u64)>,

    /// Successful loads per fallback tier name
    pub successes_by_tier: Vec<(String, u64)>,

    /// Requests where every tier failed
    pub exhausted: u64,
}
