//! Error types for signal transports
//!
//! Transport errors are transient by nature: a failed send is logged and
//! dropped, a failed poll grows the poll interval. Only after repeated
//! failures does the session layer treat signaling as unavailable.

use thiserror::Error;

use crate::recovery::RecoverableError;

/// Result type for signal transport operations
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors raised by signal transports
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    /// HTTP request could not be completed
    #[error("HTTP request failed: {reason}")]
    Http { reason: String },

    /// Relay answered with a non-success status or `success: false`
    #[error("Relay rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    /// WebSocket connect or frame error
    #[error("WebSocket error: {reason}")]
    WebSocket { reason: String },

    /// Payload could not be encoded or decoded
    #[error("Codec error: {reason}")]
    Codec { reason: String },

    /// Relay endpoint is unreachable
    #[error("Relay unavailable: {reason}")]
    Unavailable { reason: String },

    /// Transport already closed
    #[error("Transport closed")]
    Closed,

    /// Endpoint URL is not usable
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Transport settings are inconsistent
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl SignalError {
    /// Create an HTTP error
    pub fn http(reason: impl Into<String>) -> Self {
        Self::Http { reason: reason.into() }
    }

    /// Create a rejection error
    pub fn rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a WebSocket error
    pub fn websocket(reason: impl Into<String>) -> Self {
        Self::WebSocket { reason: reason.into() }
    }

    /// Create an unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    /// Create a configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SignalError::Http { .. }
            | SignalError::Rejected { .. }
            | SignalError::WebSocket { .. }
            | SignalError::Unavailable { .. }
            | SignalError::Timeout { .. } => true,

            SignalError::Codec { .. }
            | SignalError::Closed
            | SignalError::InvalidEndpoint { .. }
            | SignalError::InvalidConfiguration { .. } => false,
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            SignalError::Http { .. } | SignalError::WebSocket { .. } => "network",
            SignalError::Rejected { .. } | SignalError::Unavailable { .. } => "relay",
            SignalError::Codec { .. } => "codec",
            SignalError::Closed => "state",
            SignalError::InvalidEndpoint { .. } | SignalError::InvalidConfiguration { .. } => "configuration",
            SignalError::Timeout { .. } => "timeout",
        }
    }
}

impl RecoverableError for SignalError {
    fn is_recoverable(&self) -> bool {
        SignalError::is_recoverable(self)
    }

    fn category(&self) -> &'static str {
        SignalError::category(self)
    }

    fn timed_out(duration_ms: u64) -> Self {
        SignalError::Timeout { duration_ms }
    }
}

impl From<reqwest::Error> for SignalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SignalError::Timeout { duration_ms: 0 }
        } else if err.is_decode() {
            SignalError::Codec { reason: err.to_string() }
        } else {
            SignalError::Http { reason: err.to_string() }
        }
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Codec { reason: err.to_string() }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalError::WebSocket { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_recoverable() {
        assert!(SignalError::http("connection reset").is_recoverable());
        assert!(SignalError::unavailable("relay down").is_recoverable());
        assert!(!SignalError::Closed.is_recoverable());
        assert_eq!(SignalError::rejected("poll", "500").category(), "relay");
    }
}
