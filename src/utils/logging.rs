use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::config::MonitoringConfig;

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level; `RUST_LOG` directives still apply on top
    pub level: Level,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Whether to log span open/close events
    pub log_spans: bool,
    /// Output file path (None for stderr)
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            source_location: false,
            log_spans: false,
            file_path: None,
        }
    }
}

impl From<&MonitoringConfig> for LogConfig {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            level: config.log_level.into(),
            ..Default::default()
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn setup_logging(config: LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<(), String> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(if config.log_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    match config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| format!("Failed to set global subscriber: {}", e))
        }
        None => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| format!("Failed to set global subscriber: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_log_config_from_monitoring() {
        let monitoring = MonitoringConfig {
            log_level: LogLevel::Debug,
            ..Default::default()
        };
        let config = LogConfig::from(&monitoring);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_log_initialization_is_idempotent() {
        assert!(setup_logging(LogConfig::default()).is_ok());
        assert!(setup_logging(LogConfig::default()).is_ok());
        tracing::info!(owner_id = 1, "logging initialized");
    }
}
