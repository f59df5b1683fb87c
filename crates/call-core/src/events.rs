//! Call events
//!
//! The session controller publishes [`CallEvent`]s on a broadcast channel.
//! Every event carries an [`EventPriority`] so consumers can drop routine
//! quality chatter and still see failures.
//!
//! ```rust,no_run
//! # use peercall_call_core::{CallEvent, EventPriority, SessionController};
//! # async fn example(controller: SessionController) {
//! let mut events = controller.subscribe_events();
//! while let Ok(event) = events.recv().await {
//!     if event.priority() >= EventPriority::High {
//!         tracing::warn!(?event, "Call needs attention");
//!     }
//! }
//! # }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use peercall_quality_core::{QualityAssessment, QualityRating, QualityScore, QualityTrend, VideoProfile};
use peercall_signal_core::{CallId, CallNotice};
use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// Lifecycle of a call as seen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    AcquiringMedia,
    /// Offer/answer and ICE in progress
    Negotiating,
    Connected,
    Reconnecting,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_finished(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::AcquiringMedia => "acquiring_media",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::Reconnecting => "reconnecting",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEndReason {
    /// `hangup()` was called; the remote side was told
    LocalHangup,
    /// The remote side sent a hangup
    RemoteHangup,
    /// `end_session()` was called; the remote side was not told
    SessionEnded,
    /// A terminal error ended the call
    Failed,
}

impl fmt::Display for CallEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallEndReason::LocalHangup => "local_hangup",
            CallEndReason::RemoteHangup => "remote_hangup",
            CallEndReason::SessionEnded => "session_ended",
            CallEndReason::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Event priority levels for filtering and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// Routine quality and bitrate updates
    Low,
    /// State changes and stream attachment
    Normal,
    /// Alerts and reconnects
    High,
    /// Failures
    Critical,
}

/// Non-fatal conditions worth surfacing
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// No local candidate appeared within the gathering bound
    IceGatheringTimeout { timeout_ms: u64 },
    /// Relay notice with no negotiation payload
    Signaling(CallNotice),
    /// Connectivity dropped but has not failed yet
    ConnectionInterrupted,
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged {
        call_id: CallId,
        previous: CallState,
        current: CallState,
        at: DateTime<Utc>,
    },
    RemoteStreamAttached {
        call_id: CallId,
        stream_id: String,
    },
    /// Emitted only when a rating differs from the previous sample
    QualityChanged {
        call_id: CallId,
        previous: Option<QualityRating>,
        assessment: QualityAssessment,
        score: QualityScore,
        trend: QualityTrend,
    },
    QualityAlert {
        call_id: CallId,
        rating: QualityRating,
        message: String,
    },
    BitrateChanged {
        call_id: CallId,
        previous_bps: u64,
        current_bps: u64,
    },
    ProfileChanged {
        call_id: CallId,
        previous: VideoProfile,
        current: VideoProfile,
        width: u32,
        height: u32,
        frame_rate: u32,
    },
    Diagnostic {
        call_id: CallId,
        diagnostic: Diagnostic,
    },
    Reconnecting {
        call_id: CallId,
        attempt: u32,
    },
    CallFailed {
        call_id: CallId,
        error: CallError,
    },
    CallEnded {
        call_id: CallId,
        reason: CallEndReason,
    },
}

impl CallEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            CallEvent::QualityChanged { .. } | CallEvent::BitrateChanged { .. } | CallEvent::ProfileChanged { .. } => {
                EventPriority::Low
            }
            CallEvent::StateChanged { .. }
            | CallEvent::RemoteStreamAttached { .. }
            | CallEvent::Diagnostic { .. }
            | CallEvent::CallEnded { .. } => EventPriority::Normal,
            CallEvent::QualityAlert { .. } | CallEvent::Reconnecting { .. } => EventPriority::High,
            CallEvent::CallFailed { .. } => EventPriority::Critical,
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            CallEvent::StateChanged { call_id, .. }
            | CallEvent::RemoteStreamAttached { call_id, .. }
            | CallEvent::QualityChanged { call_id, .. }
            | CallEvent::QualityAlert { call_id, .. }
            | CallEvent::BitrateChanged { call_id, .. }
            | CallEvent::ProfileChanged { call_id, .. }
            | CallEvent::Diagnostic { call_id, .. }
            | CallEvent::Reconnecting { call_id, .. }
            | CallEvent::CallFailed { call_id, .. }
            | CallEvent::CallEnded { call_id, .. } => call_id,
        }
    }
}
