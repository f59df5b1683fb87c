//! Relay wire contracts
//!
//! HTTP variant:
//!
//! ```text
//! POST /signal       {callId, type: offer|answer|ice|hangup, payload}  -> {success}
//! POST /poll-signal  {callId}  -> {success, offer?, answer?, ice_candidates?: []}
//! ```
//!
//! Socket variant: `{type: new_call|offer|answer|ice_candidate|hangup|call_accepted|call_transfer, callId, ...}`.
//! Absent fields in a poll response mean "nothing new", never a negative signal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SignalError, SignalResult};
use crate::message::{CallId, IceCandidate, SessionDescription, SignalKind, SignalMessage, SignalPayload};
use crate::transport::TransportEvent;

/// Body of `POST /signal`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    #[serde(rename = "callId")]
    pub call_id: CallId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl SignalRequest {
    pub fn from_message(message: &SignalMessage) -> SignalResult<Self> {
        let payload = match &message.payload {
            SignalPayload::Offer(desc) | SignalPayload::Answer(desc) => serde_json::to_value(desc)?,
            SignalPayload::Ice(candidate) => serde_json::to_value(candidate)?,
            SignalPayload::Hangup => Value::Null,
        };
        Ok(Self {
            call_id: message.call_id.clone(),
            kind: message.kind(),
            payload,
        })
    }

    /// Decode back into a message, as a relay would on receipt
    pub fn into_message(self) -> SignalResult<SignalMessage> {
        let payload = match self.kind {
            SignalKind::Offer => SignalPayload::Offer(serde_json::from_value(self.payload)?),
            SignalKind::Answer => SignalPayload::Answer(serde_json::from_value(self.payload)?),
            SignalKind::Ice => SignalPayload::Ice(serde_json::from_value(self.payload)?),
            SignalKind::Hangup => SignalPayload::Hangup,
        };
        Ok(SignalMessage::new(self.call_id, payload))
    }
}

/// Response to `POST /signal`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /poll-signal`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

/// Response to `POST /poll-signal`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_candidates: Option<Vec<IceCandidate>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hangup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollResponse {
    /// Flatten the batch into messages: descriptions, then candidates, then hangup
    pub fn into_messages(self, call_id: &CallId) -> SignalResult<Vec<SignalMessage>> {
        if !self.success {
            return Err(SignalError::rejected(
                "poll",
                self.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }

        let mut messages = Vec::new();
        if let Some(offer) = self.offer {
            messages.push(SignalMessage::offer(call_id.clone(), offer));
        }
        if let Some(answer) = self.answer {
            messages.push(SignalMessage::answer(call_id.clone(), answer));
        }
        for candidate in self.ice_candidates.into_iter().flatten() {
            messages.push(SignalMessage::ice(call_id.clone(), candidate));
        }
        if self.hangup {
            messages.push(SignalMessage::hangup(call_id.clone()));
        }
        Ok(messages)
    }
}

/// Non-negotiation notices carried by the socket relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallNotice {
    /// A customer is waiting for an operator
    Incoming { call_id: CallId, customer_name: Option<String> },
    /// The other side picked up
    Accepted { call_id: CallId },
    /// The call was handed to another agent
    Transferred { call_id: CallId, target_agent_id: Option<String> },
}

/// Frames exchanged over the socket relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage {
    NewCall {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
        #[serde(rename = "customerName", alias = "customer_name", default, skip_serializing_if = "Option::is_none")]
        customer_name: Option<String>,
    },
    Offer {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
        offer: SessionDescription,
    },
    Answer {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
        candidate: IceCandidate,
    },
    Hangup {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
    },
    CallAccepted {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
    },
    CallTransfer {
        #[serde(rename = "callId", alias = "call_id")]
        call_id: CallId,
        #[serde(rename = "targetAgentId", alias = "target_admin_id", default, skip_serializing_if = "Option::is_none")]
        target_agent_id: Option<String>,
    },
}

impl SocketMessage {
    pub fn from_message(message: &SignalMessage) -> Self {
        let call_id = message.call_id.clone();
        match &message.payload {
            SignalPayload::Offer(offer) => SocketMessage::Offer { call_id, offer: offer.clone() },
            SignalPayload::Answer(answer) => SocketMessage::Answer { call_id, answer: answer.clone() },
            SignalPayload::Ice(candidate) => SocketMessage::IceCandidate {
                call_id,
                candidate: candidate.clone(),
            },
            SignalPayload::Hangup => SocketMessage::Hangup { call_id },
        }
    }

    pub fn call_id(&self) -> &CallId {
        match self {
            SocketMessage::NewCall { call_id, .. }
            | SocketMessage::Offer { call_id, .. }
            | SocketMessage::Answer { call_id, .. }
            | SocketMessage::IceCandidate { call_id, .. }
            | SocketMessage::Hangup { call_id }
            | SocketMessage::CallAccepted { call_id }
            | SocketMessage::CallTransfer { call_id, .. } => call_id,
        }
    }

    pub fn into_event(self) -> TransportEvent {
        match self {
            SocketMessage::Offer { call_id, offer } => TransportEvent::Message(SignalMessage::offer(call_id, offer)),
            SocketMessage::Answer { call_id, answer } => {
                TransportEvent::Message(SignalMessage::answer(call_id, answer))
            }
            SocketMessage::IceCandidate { call_id, candidate } => {
                TransportEvent::Message(SignalMessage::ice(call_id, candidate))
            }
            SocketMessage::Hangup { call_id } => TransportEvent::Message(SignalMessage::hangup(call_id)),
            SocketMessage::NewCall { call_id, customer_name } => {
                TransportEvent::Control(CallNotice::Incoming { call_id, customer_name })
            }
            SocketMessage::CallAccepted { call_id } => TransportEvent::Control(CallNotice::Accepted { call_id }),
            SocketMessage::CallTransfer { call_id, target_agent_id } => {
                TransportEvent::Control(CallNotice::Transferred { call_id, target_agent_id })
            }
        }
    }
}
