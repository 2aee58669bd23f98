use std::time::Instant;

use parking_lot::RwLock;

use super::types::{LoadMetrics, MetricsSnapshot, TurnMetrics};
use crate::cache::CacheStats;
use crate::config::MonitoringConfig;
use crate::types::GenerationMetrics;

/// Collects turn and load metrics for one engine instance
pub struct MetricsCollector {
    enabled: bool,
    state: RwLock<MetricsState>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsState {
    turns: TurnMetrics,
    tps_samples: u64,
    tps_sum: f64,
    loads: LoadMetrics,
}

fn bump(counts: &mut Vec<(String, u64)>, key: &str) {
    if let Some(entry) = counts.iter_mut().find(|(k, _)| k == key) {
        entry.1 += 1;
    } else {
        counts.push((key.to_string(), 1));
    }
}

impl MetricsCollector {
    pub fn new(config: &MonitoringConfig) -> Self {
        Self {
            enabled: config.enable_metrics,
            state: RwLock::new(MetricsState::default()),
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of a conversational turn
    pub fn record_turn(&self, metrics: Option<&GenerationMetrics>, resumed: bool, reasoning_chars: usize) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.write();
        let succeeded = metrics.map(|m| !m.is_error()).unwrap_or(false);
        if succeeded {
            state.turns.completed += 1;
        } else {
            state.turns.failed += 1;
        }
        if resumed {
            state.turns.cache_resumed += 1;
        }
        state.turns.reasoning_chars += reasoning_chars as u64;

        if let Some(metrics) = metrics {
            state.turns.generated_tokens += u64::from(metrics.generation_tokens);
            if succeeded && metrics.tokens_per_second > 0.0 {
                state.tps_samples += 1;
                state.tps_sum += metrics.tokens_per_second;
                state.turns.average_tokens_per_second = state.tps_sum / state.tps_samples as f64;
            }
        }
    }

    /// Record one load attempt on a fallback tier
    pub fn record_load_attempt(&self, tier: &str, succeeded: bool) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.write();
        bump(&mut state.loads.attempts_by_tier, tier);
        if succeeded {
            bump(&mut state.loads.successes_by_tier, tier);
        }
    }

    /// Record a load request whose every tier failed
    pub fn record_load_exhausted(&self) {
        if !self.enabled {
            return;
        }
        self.state.write().loads.exhausted += 1;
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        let state = self.state.read();
        MetricsSnapshot {
            timestamp: std::time::SystemTime::now(),
            uptime: self.start_time.elapsed(),
            turns: state.turns.clone(),
            loads: state.loads.clone(),
            cache,
        }
    }
}
