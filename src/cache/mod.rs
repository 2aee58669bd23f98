//! Per-conversation KV snapshot cache with count and byte budgets

mod stats;
mod store;

pub use stats::{CacheStats, CaptureOutcome};
pub use store::KvCacheStore;

/// Extension of committed snapshot files
pub(crate) const SNAPSHOT_EXTENSION: &str = "kv";

/// Extension of snapshot files still being written
pub(crate) const PARTIAL_EXTENSION: &str = "kv.tmp";
