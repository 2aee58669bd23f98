// Location: src/cache/store.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::{CacheStats, CaptureOutcome, PARTIAL_EXTENSION, SNAPSHOT_EXTENSION};
use crate::{
    backend::InferenceBackend,
    config::CacheConfig,
    error::{EngineError, Result},
    types::OwnerId,
};

const FILE_PREFIX: &str = "conv_";

/// Durable store of opaque per-conversation session snapshots.
///
/// Bounded by both an entry count and a byte budget; least recently used
/// entries (captured or successfully restored) are evicted first. All index
/// mutations go through one exclusive section, and operations on the same
/// conversation are ordered by a per-owner lock.
pub struct KvCacheStore {
    config: CacheConfig,
    backend: Arc<dyn InferenceBackend>,
    index: Mutex<CacheIndex>,
    owner_locks: DashMap<OwnerId, Arc<Mutex<()>>>,
    stats_tx: watch::Sender<CacheStats>,
    model_generation: AtomicU64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: PathBuf,
    size_bytes: u64,
    last_access: u64,
    model_generation: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<OwnerId, CacheEntry>,
    clock: u64,
    stats: CacheStats,
}

impl CacheIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl KvCacheStore {
    /// Open the store, creating its directory and dropping snapshot files
    /// left behind by a previous process.
    pub async fn open(config: CacheConfig, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(|source| EngineError::Cache {
                message: format!("cannot create {}", config.directory.display()),
                source,
            })?;

        let purged = purge_leftovers(&config.directory).await?;
        if purged > 0 {
            info!(purged, dir = %config.directory.display(), "Removed stale session snapshots");
        }

        let (stats_tx, _) = watch::channel(CacheStats::default());
        Ok(Self {
            config,
            backend,
            index: Mutex::new(CacheIndex::default()),
            owner_locks: DashMap::new(),
            stats_tx,
            model_generation: AtomicU64::new(0),
        })
    }

    /// Persist the backend's current session state for `owner_id`
    pub async fn capture_kv(&self, owner_id: OwnerId) -> CaptureOutcome {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        // The blob belongs to the model that was loaded when capture started
        let generation = self.model_generation.load(Ordering::Acquire);
        let bytes = match self.backend.capture_state().await {
            Ok(bytes) if bytes.is_empty() => {
                debug!(owner_id, "Backend returned an empty session state");
                return CaptureOutcome::Unavailable {
                    reason: "empty session state".to_string(),
                };
            }
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(owner_id, error = %e, "Session state capture failed");
                return CaptureOutcome::Unavailable { reason: e.to_string() };
            }
        };

        let size_bytes = bytes.len() as u64;
        if size_bytes > self.config.max_bytes {
            info!(
                owner_id,
                size_bytes,
                budget = self.config.max_bytes,
                "Skipping snapshot larger than the cache budget"
            );
            return CaptureOutcome::Oversized { size_bytes };
        }

        let path = self.entry_path(owner_id);
        let partial = path.with_extension(PARTIAL_EXTENSION);
        if let Err(e) = tokio::fs::write(&partial, &bytes).await {
            warn!(owner_id, error = %e, "Failed to write session snapshot");
            remove_quietly(&partial).await;
            return CaptureOutcome::Unavailable { reason: e.to_string() };
        }

        let mut index = self.index.lock().await;
        if generation != self.model_generation.load(Ordering::Acquire) {
            info!(owner_id, "Model changed during capture, dropping snapshot");
            remove_quietly(&partial).await;
            return CaptureOutcome::Unavailable {
                reason: "model changed during capture".to_string(),
            };
        }
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            warn!(owner_id, error = %e, "Failed to commit session snapshot");
            remove_quietly(&partial).await;
            return CaptureOutcome::Unavailable { reason: e.to_string() };
        }

        let last_access = index.tick();
        let entry = CacheEntry {
            path,
            size_bytes,
            last_access,
            model_generation: generation,
        };
        if let Some(previous) = index.entries.insert(owner_id, entry) {
            index.stats.total_bytes = index.stats.total_bytes.saturating_sub(previous.size_bytes);
        }
        index.stats.total_bytes += size_bytes;

        let evicted = self.evict_locked(&mut index).await;
        self.publish(&index);
        debug!(owner_id, size_bytes, evicted, total_bytes = index.stats.total_bytes, "Captured session snapshot");

        CaptureOutcome::Stored { size_bytes, evicted }
    }

    /// Restore `owner_id`'s snapshot into the backend. Returns false on a
    /// miss, including snapshots found to be corrupt, which are dropped.
    pub async fn restore_kv(&self, owner_id: OwnerId) -> bool {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        let entry = {
            let mut index = self.index.lock().await;
            match index.entries.get(&owner_id) {
                Some(entry) => entry.clone(),
                None => {
                    index.stats.misses += 1;
                    self.publish(&index);
                    debug!(owner_id, "Session cache miss");
                    return false;
                }
            }
        };

        if entry.model_generation != self.model_generation.load(Ordering::Acquire) {
            self.discard(owner_id, "captured under a previously loaded model").await;
            return false;
        }

        let bytes = match tokio::fs::read(&entry.path).await {
            Ok(bytes) if bytes.len() as u64 == entry.size_bytes => bytes,
            Ok(bytes) => {
                let reason = format!("expected {} bytes, found {}", entry.size_bytes, bytes.len());
                self.discard(owner_id, &reason).await;
                return false;
            }
            Err(e) => {
                self.discard(owner_id, &e.to_string()).await;
                return false;
            }
        };

        match self.backend.restore_state(&bytes).await {
            Ok(true) => {
                let mut index = self.index.lock().await;
                let now = index.tick();
                if let Some(entry) = index.entries.get_mut(&owner_id) {
                    entry.last_access = now;
                }
                index.stats.hits += 1;
                self.publish(&index);
                debug!(owner_id, size_bytes = entry.size_bytes, "Session cache hit");
                true
            }
            Ok(false) => {
                self.discard(owner_id, "rejected by backend").await;
                false
            }
            Err(e) => {
                self.discard(owner_id, &e.to_string()).await;
                false
            }
        }
    }

    /// Remove one conversation's snapshot. Counters other than the byte
    /// total are left untouched.
    pub async fn clear_kv(&self, owner_id: OwnerId) -> bool {
        let removed = {
            let lock = self.owner_lock(owner_id);
            let _guard = lock.lock().await;

            let mut index = self.index.lock().await;
            let removed = self.remove_locked(&mut index, owner_id).await;
            if removed {
                self.publish(&index);
                debug!(owner_id, "Cleared session snapshot");
            }
            removed
        };
        self.prune_owner_lock(owner_id);
        removed
    }

    /// Remove every snapshot and reset all counters
    pub async fn clear_all_kv(&self) {
        let mut index = self.index.lock().await;
        let count = index.entries.len();
        for (_, entry) in index.entries.drain() {
            remove_quietly(&entry.path).await;
        }
        index.stats = CacheStats::default();
        self.owner_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.publish(&index);
        info!(count, "Cleared all session snapshots");
    }

    /// Mark every existing snapshot as stale. Called whenever the loaded
    /// model changes; stale entries miss on restore and are dropped then.
    pub fn invalidate(&self) {
        let generation = self.model_generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "Invalidated session snapshots");
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats_tx.borrow()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<CacheStats> {
        self.stats_tx.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, owner_id: OwnerId) -> bool {
        self.index.lock().await.entries.contains_key(&owner_id)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Deterministic backing file for a conversation
    pub fn entry_path(&self, owner_id: OwnerId) -> PathBuf {
        self.config
            .directory
            .join(format!("{}{}.{}", FILE_PREFIX, owner_id, SNAPSHOT_EXTENSION))
    }

    fn owner_lock(&self, owner_id: OwnerId) -> Arc<Mutex<()>> {
        self.owner_locks.entry(owner_id).or_default().value().clone()
    }

    /// Forget an owner's lock once nothing else holds it
    fn prune_owner_lock(&self, owner_id: OwnerId) {
        self.owner_locks.remove_if(&owner_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn discard(&self, owner_id: OwnerId, reason: &str) {
        let mut index = self.index.lock().await;
        self.remove_locked(&mut index, owner_id).await;
        index.stats.misses += 1;
        self.publish(&index);
        warn!(owner_id, reason, "Dropped unusable session snapshot");
    }

    async fn remove_locked(&self, index: &mut CacheIndex, owner_id: OwnerId) -> bool {
        match index.entries.remove(&owner_id) {
            Some(entry) => {
                index.stats.total_bytes = index.stats.total_bytes.saturating_sub(entry.size_bytes);
                remove_quietly(&entry.path).await;
                true
            }
            None => false,
        }
    }

    async fn evict_locked(&self, index: &mut CacheIndex) -> usize {
        let mut evicted = 0;
        while index.entries.len() > self.config.max_files
            || index.stats.total_bytes > self.config.max_bytes
        {
            let Some(victim) = index
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(owner_id, _)| *owner_id)
            else {
                break;
            };

            if self.remove_locked(index, victim).await {
                index.stats.evictions += 1;
                evicted += 1;
                self.prune_owner_lock(victim);
                debug!(owner_id = victim, "Evicted least recently used session snapshot");
            }
        }
        evicted
    }

    fn publish(&self, index: &CacheIndex) {
        self.stats_tx.send_replace(index.stats);
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to delete snapshot file");
        }
    }
}

async fn purge_leftovers(dir: &Path) -> Result<usize> {
    let mut purged = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let ours = name.starts_with(FILE_PREFIX)
            && (name.ends_with(&format!(".{}", SNAPSHOT_EXTENSION))
                || name.ends_with(&format!(".{}", PARTIAL_EXTENSION)));
        if ours {
            remove_quietly(&entry.path()).await;
            purged += 1;
        }
    }
    Ok(purged)
}
