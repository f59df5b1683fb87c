//! Signal transport layer for peercall
//!
//! This crate carries signaling payloads (SDP offers/answers, ICE candidates,
//! hangups) between the two endpoints of a call, identified by a call id.
//!
//! ```text
//! call-core -> signal-core -> {HTTP relay, WebSocket relay, in-memory relay}
//! ```
//!
//! Delivery is best-effort. Messages may be lost, duplicated, or reordered
//! across batches, so consumers must be idempotent. Pull transports are
//! driven by a [`PollScheduler`] whose interval adapts to relay health.

pub mod error;
pub mod http;
pub mod message;
pub mod poll;
pub mod recovery;
pub mod relay;
pub mod transport;
pub mod wire;
pub mod ws;

pub use error::{SignalError, SignalResult};
pub use http::{HttpPollTransport, HttpTransportConfig, HttpTransportFactory};
pub use message::{
    CallId, CandidateKey, IceCandidate, Role, SdpType, SessionDescription, SignalKind,
    SignalMessage, SignalPayload,
};
pub use poll::{PollConfig, PollOutcome, PollScheduler};
pub use recovery::{RecoverableError, RetryConfig, retry_with_backoff, with_timeout};
pub use relay::{InMemoryRelay, RelayEndpoint};
pub use transport::{Delivery, SignalTransport, TransportEvent, TransportFactory};
pub use wire::{CallNotice, PollRequest, PollResponse, SignalAck, SignalRequest, SocketMessage};
pub use ws::{WebSocketConfig, WebSocketFactory, WebSocketTransport};

/// Signal-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
