use serde::{Deserialize, Serialize};

/// Counters owned by a single [`KvCacheStore`](super::KvCacheStore)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_bytes: u64,
}

impl CacheStats {
    /// Fraction of restores that were served from cache
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// What a capture did with the backend's state blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Written and indexed; `evicted` entries were dropped to respect the budgets
    Stored { size_bytes: u64, evicted: usize },
    /// Larger than the whole byte budget, so never written
    Oversized { size_bytes: u64 },
    /// The backend had no usable state or the write failed
    Unavailable { reason: String },
}

impl CaptureOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, CaptureOutcome::Stored { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
