//! Error types for call setup, negotiation, and session control
//!
//! # Error Categories
//!
//! - **Media errors** (`PermissionDenied`, `DeviceNotFound`, `DeviceBusy`) are
//!   user-actionable and surface immediately; the call never reaches
//!   negotiation.
//! - **Negotiation errors** are terminal only for the first offer/answer of a
//!   session. Later rejections are logged and skipped.
//! - **Connectivity and signaling errors** get one bounded reconnect before
//!   they end the call.
//! - **State and configuration errors** report misuse of the API.
//!
//! ```rust,no_run
//! # use peercall_call_core::{CallError, SessionController};
//! # use peercall_signal_core::CallId;
//! # async fn example(controller: SessionController) {
//! match controller.start_call(CallId::generate()).await {
//!     Ok(()) => {}
//!     Err(CallError::PermissionDenied { .. }) => {
//!         // Ask the user to allow camera and microphone access
//!     }
//!     Err(e) => tracing::error!(error = %e, category = e.category(), "Call setup failed"),
//! }
//! # }
//! ```

use peercall_quality_core::QualityError;
use peercall_signal_core::{RecoverableError, SignalError};
use thiserror::Error;

/// Result type alias for call-core operations
pub type CallResult<T> = Result<T, CallError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Relay unreachable after the poll failure threshold or a failed reconnect
    #[error("Signaling unavailable: {reason}")]
    SignalingUnavailable { reason: String },

    /// The first offer/answer of a session could not be applied
    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    #[error("Permission denied for {device}")]
    PermissionDenied { device: String },

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Device busy: {device}")]
    DeviceBusy { device: String },

    /// Connectivity failed and the reconnect budget is spent
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("A call is already active: {call_id}")]
    CallAlreadyActive { call_id: String },

    #[error("No active call")]
    NoActiveCall,

    #[error("Invalid configuration: {field} - {reason}")]
    Configuration { field: String, reason: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    /// A peer-connection operation was rejected
    #[error("Peer connection error during {operation}: {reason}")]
    Peer { operation: String, reason: String },

    #[error("Signal transport error: {0}")]
    Signal(#[from] SignalError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CallError {
    pub fn signaling_unavailable(reason: impl Into<String>) -> Self {
        Self::SignalingUnavailable { reason: reason.into() }
    }

    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed { reason: reason.into() }
    }

    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost { reason: reason.into() }
    }

    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn peer(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Peer {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if retrying the same operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallError::SignalingUnavailable { .. }
            | CallError::ConnectionLost { .. }
            | CallError::DeviceBusy { .. }
            | CallError::OperationTimeout { .. } => true,

            CallError::Signal(e) => e.is_recoverable(),

            CallError::NegotiationFailed { .. }
            | CallError::PermissionDenied { .. }
            | CallError::DeviceNotFound { .. }
            | CallError::InvalidState { .. }
            | CallError::CallAlreadyActive { .. }
            | CallError::NoActiveCall
            | CallError::Configuration { .. }
            | CallError::Peer { .. }
            | CallError::Internal { .. } => false,
        }
    }

    /// Errors that end the call when they reach the session controller
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallError::SignalingUnavailable { .. }
                | CallError::NegotiationFailed { .. }
                | CallError::PermissionDenied { .. }
                | CallError::DeviceNotFound { .. }
                | CallError::DeviceBusy { .. }
                | CallError::ConnectionLost { .. }
        )
    }

    /// Media acquisition errors the user can act on
    pub fn is_media_error(&self) -> bool {
        matches!(
            self,
            CallError::PermissionDenied { .. } | CallError::DeviceNotFound { .. } | CallError::DeviceBusy { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallError::SignalingUnavailable { .. } | CallError::Signal(_) => "signaling",
            CallError::NegotiationFailed { .. } | CallError::Peer { .. } => "negotiation",
            CallError::PermissionDenied { .. } | CallError::DeviceNotFound { .. } | CallError::DeviceBusy { .. } => {
                "media"
            }
            CallError::ConnectionLost { .. } => "connectivity",
            CallError::InvalidState { .. } | CallError::CallAlreadyActive { .. } | CallError::NoActiveCall => "state",
            CallError::Configuration { .. } => "configuration",
            CallError::OperationTimeout { .. } => "timeout",
            CallError::Internal { .. } => "internal",
        }
    }
}

impl RecoverableError for CallError {
    fn is_recoverable(&self) -> bool {
        CallError::is_recoverable(self)
    }

    fn category(&self) -> &'static str {
        CallError::category(self)
    }

    fn timed_out(duration_ms: u64) -> Self {
        CallError::OperationTimeout { duration_ms }
    }
}

impl From<QualityError> for CallError {
    fn from(err: QualityError) -> Self {
        let field = match &err {
            QualityError::UnorderedThresholds { metric, .. } => *metric,
            QualityError::InvalidBitrate { field, .. } | QualityError::InvalidConfiguration { field, .. } => *field,
        };
        CallError::configuration(field, err.to_string())
    }
}
