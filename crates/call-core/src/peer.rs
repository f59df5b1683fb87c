//! Peer connection abstraction
//!
//! Any WebRTC-capable stack can drive a call by implementing
//! [`PeerConnection`] and [`PeerConnectionFactory`]. Asynchronous callbacks
//! (local candidates, connectivity changes, remote tracks) arrive as
//! [`PeerEvent`]s on the receiver returned by the factory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use peercall_quality_core::StatsSnapshot;
use peercall_signal_core::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CallResult;
use crate::media::MediaStream;

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: impl Into<String>, username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    #[default]
    MaxBundle,
    MaxCompat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtcpMuxPolicy {
    Negotiate,
    #[default]
    Require,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

/// Settings handed to the peer connection factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfiguration {
    pub ice_servers: Vec<IceServer>,
    pub bundle_policy: BundlePolicy,
    pub rtcp_mux_policy: RtcpMuxPolicy,
    pub ice_transport_policy: IceTransportPolicy,
    pub ice_candidate_pool_size: u8,
}

impl Default for PeerConfiguration {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
            bundle_policy: BundlePolicy::MaxBundle,
            rtcp_mux_policy: RtcpMuxPolicy::Require,
            ice_transport_policy: IceTransportPolicy::All,
            ice_candidate_pool_size: 10,
        }
    }
}

/// ICE/DTLS connectivity as reported by the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Checking => "checking",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Sender parameters pushed to a live connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub max_bitrate_bps: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_frame_rate: Option<u32>,
}

impl EncodingParameters {
    pub fn is_empty(&self) -> bool {
        self.max_bitrate_bps.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && self.max_frame_rate.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    GatheringComplete,
    ConnectionStateChanged(ConnectionState),
    RemoteStream(Arc<dyn MediaStream>),
}

/// One negotiated media connection
#[async_trait]
pub trait PeerConnection: Send + Sync + fmt::Debug {
    async fn create_offer(&self, ice_restart: bool) -> CallResult<SessionDescription>;

    async fn create_answer(&self) -> CallResult<SessionDescription>;

    /// A rollback description discards a pending local offer
    async fn set_local_description(&self, description: &SessionDescription) -> CallResult<()>;

    async fn set_remote_description(&self, description: &SessionDescription) -> CallResult<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()>;

    /// Send the tracks of a local stream
    async fn add_local_stream(&self, stream: Arc<dyn MediaStream>) -> CallResult<()>;

    /// Cumulative transport statistics
    async fn stats(&self) -> CallResult<StatsSnapshot>;

    async fn set_encoding(&self, parameters: &EncodingParameters) -> CallResult<()>;

    async fn close(&self) -> CallResult<()>;
}

/// Creates a fresh peer connection per call attempt
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        config: &PeerConfiguration,
    ) -> CallResult<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerEvent>)>;
}
