//! Call session control for peercall
//!
//! This crate negotiates and supervises one two-party WebRTC call at a
//! time. It sits on top of the signal transport and the quality pipeline:
//!
//! ```text
//!                     SessionController
//!                            |
//!                      driver task (per call)
//!        +-------------+-----+-----------+---------------+
//!        |             |                 |               |
//!   Negotiator   SignalTransport   PeerConnection   MediaAdapter
//!   (offer/answer,  (signal-core)   (any WebRTC     (quality-core:
//!    candidates)                      stack)         monitor, bitrate,
//!                                                    profile)
//! ```
//!
//! The peer connection, local capture, remote rendering, and call history
//! are collaborators supplied through [`CallDependencies`].
//!
//! # Example
//!
//! ```rust,no_run
//! use peercall_call_core::{CallConfig, CallDependencies, SessionController};
//! use peercall_signal_core::CallId;
//! # use std::sync::Arc;
//! # async fn example(
//! #     peers: Arc<dyn peercall_call_core::PeerConnectionFactory>,
//! #     media: Arc<dyn peercall_call_core::MediaSource>,
//! #     render: Arc<dyn peercall_call_core::RenderSink>,
//! # ) -> peercall_call_core::CallResult<()> {
//! let config = CallConfig::from_env()?;
//! let deps = CallDependencies::from_config(&config, peers, media, render)?;
//! let controller = SessionController::new(config, deps)?;
//!
//! let mut events = controller.subscribe_events();
//! controller.start_call(CallId::generate()).await?;
//! while let Ok(event) = events.recv().await {
//!     tracing::info!(?event, "call event");
//! }
//! # Ok(())
//! # }
//! ```

pub mod adaptation;
pub mod config;
pub mod controller;
mod driver;
pub mod error;
pub mod events;
pub mod logging;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod sdp;

pub use adaptation::{AdaptationOutcome, MediaAdapter};
pub use config::CallConfig;
pub use controller::{CallDependencies, CallSnapshot, SessionController};
pub use error::{CallError, CallResult};
pub use events::{CallEndReason, CallEvent, CallState, Diagnostic, EventPriority};
pub use logging::{LoggingConfig, setup_logging};
pub use media::{CallLog, CallRecord, MediaConstraints, MediaSource, MediaStream, RenderSink, VideoConstraints};
pub use negotiation::{GlarePolicy, NegotiationSnapshot, NegotiationState, Negotiator};
pub use peer::{
    BundlePolicy, ConnectionState, EncodingParameters, IceServer, IceTransportPolicy, PeerConfiguration,
    PeerConnection, PeerConnectionFactory, PeerEvent, RtcpMuxPolicy,
};
pub use sdp::{MediaKind, NegotiationOptions, OpusSettings};

/// Call-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
