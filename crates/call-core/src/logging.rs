//! Logging setup for binaries and tests embedding the engine.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::{EngineError, Result};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use.
    pub level: Level,
    /// Whether to include file and line information.
    pub file_info: bool,
    /// Whether to log span enter/exit events.
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    /// Enable file and line information in logs.
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging.
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Set up the global tracing subscriber with the provided configuration.
///
/// `RUST_LOG` directives layer on top of the configured level. Fails if a
/// global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .try_init()
        .map_err(|e| EngineError::Config(format!("failed to install subscriber: {e}")))
}

/// Parse a log level from a string.
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| EngineError::Config(format!("invalid log level: {level}")))
}
