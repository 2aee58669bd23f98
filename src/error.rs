use std::path::PathBuf;
use std::time::Duration;

use crate::engine::TierFailure;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error for {parameter}: {message}")]
    Configuration {
        parameter: String,
        message: String,
    },

    #[error("Invalid model file {}: {reason}", path.display())]
    InvalidModel {
        path: PathBuf,
        reason: String,
    },

    /// Every fallback tier failed; `message` concatenates the tier-tagged reasons
    #[error("{message}")]
    LoadFailed {
        message: String,
        attempts: Vec<TierFailure>,
    },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled {
        operation: String,
    },

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Inference backend error: {message}")]
    Backend {
        message: String,
    },

    #[error("No model is loaded")]
    NotLoaded,

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config persistence error: {message}")]
    Persistence {
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn backend(message: impl Into<String>) -> Self {
        EngineError::Backend {
            message: message.into(),
        }
    }

    pub(crate) fn configuration(parameter: &str, message: impl Into<String>) -> Self {
        EngineError::Configuration {
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }
}

/// Extension trait for error handling utilities
pub(crate) trait ErrorExt {
    /// Whether a failed load attempt should move on to the next fallback tier
    fn advances_fallback(&self) -> bool;
}

impl ErrorExt for EngineError {
    fn advances_fallback(&self) -> bool {
        !matches!(
            self,
            EngineError::Cancelled { .. }
                | EngineError::InvalidModel { .. }
                | EngineError::Configuration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EngineError::Timeout {
            operation: "load cpu-only".to_string(),
            duration: Duration::from_secs(2),
        };
        assert_eq!(error.to_string(), "Operation 'load cpu-only' timed out after 2s");

        let error = EngineError::configuration("cache.max_files", "must be at least 1");
        assert_eq!(
            error.to_string(),
            "Configuration error for cache.max_files: must be at least 1"
        );
    }

    #[test]
    fn test_fallback_classification() {
        assert!(EngineError::backend("vulkan device lost").advances_fallback());
        assert!(EngineError::Timeout {
            operation: "load".to_string(),
            duration: Duration::from_secs(1),
        }
        .advances_fallback());
        assert!(!EngineError::Cancelled {
            operation: "load".to_string(),
        }
        .advances_fallback());
        assert!(!EngineError::InvalidModel {
            path: PathBuf::from("/models/a.gguf"),
            reason: "missing".to_string(),
        }
        .advances_fallback());
    }
}
