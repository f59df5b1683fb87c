//! Tracing subscriber setup for applications embedding peercall
//!
//! Libraries never install a subscriber on their own; this is a helper for
//! binaries and test harnesses. `RUST_LOG` directives are honored on top
//! of the configured level.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{CallError, CallResult};

/// Configuration for the logging system
///
/// # Examples
///
/// ```rust
/// # use peercall_call_core::LoggingConfig;
/// # use tracing::Level;
/// let config = LoggingConfig::new(Level::DEBUG, "agent-console")
///     .with_json()
///     .with_file_info();
///
/// assert_eq!(config.level, Level::DEBUG);
/// assert_eq!(config.app_name, "agent-console");
/// assert!(config.json && config.file_info);
/// assert!(!config.log_spans);
/// ```
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span enter/exit
    pub log_spans: bool,
    /// Application name included in the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "peercall".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed, which makes the
/// call safe to repeat across tests.
pub fn setup_logging(config: &LoggingConfig) -> CallResult<bool> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let mut subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events);

    if config.file_info {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };

    match installed {
        Ok(()) => {
            log_welcome(&config.app_name, crate::VERSION);
            Ok(true)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Tracing subscriber already installed");
            Ok(false)
        }
    }
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> CallResult<Level> {
    Level::from_str(level).map_err(|_| CallError::configuration("log_level", format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("chatty"),
            Err(CallError::Configuration { .. })
        ));
    }

    #[test]
    fn test_builder() {
        let config = LoggingConfig::new(Level::DEBUG, "agent-console").with_json().with_file_info();
        assert!(config.json);
        assert!(config.file_info);
        assert!(!config.log_spans);
        assert_eq!(config.app_name, "agent-console");
    }

    #[test]
    fn test_setup_is_repeatable() {
        let config = LoggingConfig::default();
        let first = setup_logging(&config).unwrap();
        let second = setup_logging(&config).unwrap();
        assert!(!second || !first);
    }
}
