use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    config::EngineConfig,
    error::{EngineError, Result},
};

/// Persistence for the last successfully loaded [`EngineConfig`]
pub trait ConfigStore: Send + Sync {
    fn save(&self, config: &EngineConfig) -> Result<()>;
    fn load(&self) -> Result<Option<EngineConfig>>;
    fn clear(&self) -> Result<()>;
}

/// Stores the config as a JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn save(&self, config: &EngineConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| EngineError::Persistence {
            message: format!("failed to commit {}: {}", self.path.display(), e),
        })?;
        debug!(path = %self.path.display(), "Saved engine config");
        Ok(())
    }

    fn load(&self) -> Result<Option<EngineConfig>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, mostly useful for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<EngineConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn save(&self, config: &EngineConfig) -> Result<()> {
        *self.config.lock() = Some(config.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<EngineConfig>> {
        Ok(self.config.lock().clone())
    }

    fn clear(&self) -> Result<()> {
        *self.config.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_json_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::new(dir.path().join("nested").join("engine.json"));
        assert_eq!(store.load().unwrap(), None);

        let config = EngineConfig::new("/models/a.gguf").with_gpu_layers(16);
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_json_store_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = JsonConfigStore::new(&path);
        assert!(matches!(store.load(), Err(EngineError::Serialization(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryConfigStore::new();
        let config = EngineConfig::new("/models/b.gguf");
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), Some(config));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
