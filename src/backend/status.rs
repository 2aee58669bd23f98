use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{config::EngineConfig, types::EngineStatus};

/// Observable [`EngineStatus`] cell that only accepts legal transitions.
///
/// `Loaded` and `Error` are only reachable from `Loading`, and `Loaded`
/// must carry the configuration that was being loaded.
#[derive(Debug)]
pub struct StatusTracker {
    tx: watch::Sender<EngineStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(EngineStatus::Uninitialized);
        Self { tx }
    }

    pub fn current(&self) -> EngineStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.tx.subscribe()
    }

    pub fn begin_loading(&self, config: &EngineConfig) {
        debug!(model = %config.model_path.display(), gpu_layers = config.gpu_layers, "Status -> loading");
        self.tx.send_replace(EngineStatus::Loading(config.clone()));
    }

    /// Returns false and leaves the status untouched if no matching load is in flight
    pub fn finish_loaded(&self, config: &EngineConfig) -> bool {
        let accepted = self.tx.send_if_modified(|status| match status {
            EngineStatus::Loading(loading) if loading == config => {
                *status = EngineStatus::Loaded(config.clone());
                true
            }
            _ => false,
        });
        if !accepted {
            warn!(current = %self.current(), "Rejected Loaded transition without matching Loading");
        }
        accepted
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let accepted = self.tx.send_if_modified(|status| {
            if status.is_loading() {
                *status = EngineStatus::Error(reason.clone());
                true
            } else {
                false
            }
        });
        if !accepted {
            warn!(current = %self.current(), %reason, "Rejected Error transition outside a load");
        }
        accepted
    }

    pub fn set_idle(&self) {
        self.tx.send_replace(EngineStatus::Idle);
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let tracker = StatusTracker::new();
        let config = EngineConfig::new("/models/a.gguf");
        assert_eq!(tracker.current(), EngineStatus::Uninitialized);

        tracker.begin_loading(&config);
        assert!(tracker.finish_loaded(&config));
        assert_eq!(tracker.current(), EngineStatus::Loaded(config));

        tracker.set_idle();
        assert_eq!(tracker.current(), EngineStatus::Idle);
    }

    #[test]
    fn test_rejects_loaded_without_loading() {
        let tracker = StatusTracker::new();
        let config = EngineConfig::new("/models/a.gguf");
        assert!(!tracker.finish_loaded(&config));
        assert!(!tracker.fail("nothing in flight"));
        assert_eq!(tracker.current(), EngineStatus::Uninitialized);

        tracker.begin_loading(&config);
        assert!(!tracker.finish_loaded(&config.cpu_only().with_threads(8)));
        assert!(tracker.fail("vulkan init failed"));
        assert_eq!(tracker.current(), EngineStatus::Error("vulkan init failed".into()));
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let tracker = StatusTracker::new();
        let mut rx = tracker.subscribe();
        let config = EngineConfig::new("/models/a.gguf");

        tracker.begin_loading(&config);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_loading());

        tracker.finish_loaded(&config);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_loaded());
    }
}
