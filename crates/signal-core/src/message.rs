//! Signaling payload types
//!
//! These mirror the JSON shapes browsers produce (`RTCSessionDescriptionInit`,
//! `RTCIceCandidateInit`) so they can be relayed without translation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque call identifier, assigned externally and shared by both endpoints
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random call id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which side of the call an endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Initiates the call and sends the first offer
    Caller,
    /// Accepts the call and answers
    Callee,
}

impl Role {
    /// The opposite side of the call
    pub fn peer(self) -> Role {
        match self {
            Role::Caller => Role::Callee,
            Role::Callee => Role::Caller,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Callee => f.write_str("callee"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An SDP blob tagged with its role in the offer/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// A rollback description, used to discard a pending local offer
    pub fn rollback() -> Self {
        Self {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        }
    }
}

/// A trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }

    /// Empty candidate line, sent by browsers to mark the end of gathering
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }

    /// Structural fingerprint used to detect redelivered candidates
    ///
    /// The `a=` prefix and surrounding whitespace are ignored so that the
    /// same candidate relayed through different paths maps to one key.
    pub fn key(&self) -> CandidateKey {
        let line = self.candidate.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        CandidateKey(format!(
            "{}|{}|{}",
            line,
            self.sdp_mid.as_deref().unwrap_or(""),
            self.sdp_mline_index.map(|i| i.to_string()).unwrap_or_default()
        ))
    }
}

/// Fingerprint of an [`IceCandidate`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateKey(String);

impl CandidateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminant of a [`SignalPayload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
    Hangup,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Ice => "ice",
            SignalKind::Hangup => "hangup",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Ice(IceCandidate),
    Hangup,
}

impl SignalPayload {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalPayload::Offer(_) => SignalKind::Offer,
            SignalPayload::Answer(_) => SignalKind::Answer,
            SignalPayload::Ice(_) => SignalKind::Ice,
            SignalPayload::Hangup => SignalKind::Hangup,
        }
    }
}

/// A routed signaling message; immutable once sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub call_id: CallId,
    pub payload: SignalPayload,
}

impl SignalMessage {
    pub fn new(call_id: CallId, payload: SignalPayload) -> Self {
        Self { call_id, payload }
    }

    pub fn offer(call_id: CallId, description: SessionDescription) -> Self {
        Self::new(call_id, SignalPayload::Offer(description))
    }

    pub fn answer(call_id: CallId, description: SessionDescription) -> Self {
        Self::new(call_id, SignalPayload::Answer(description))
    }

    pub fn ice(call_id: CallId, candidate: IceCandidate) -> Self {
        Self::new(call_id, SignalPayload::Ice(candidate))
    }

    pub fn hangup(call_id: CallId) -> Self {
        Self::new(call_id, SignalPayload::Hangup)
    }

    pub fn kind(&self) -> SignalKind {
        self.payload.kind()
    }
}
