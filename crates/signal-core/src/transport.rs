use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::SignalResult;
use crate::message::{CallId, Role, SignalMessage};
use crate::wire::CallNotice;

/// How a transport hands over inbound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Caller drives `poll` on a cadence
    Pull,
    /// Messages arrive on the receiver returned by `take_events`
    Push,
}

/// Events delivered by push transports
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A negotiation message for this call
    Message(SignalMessage),
    /// A relay notice with no negotiation payload
    Control(CallNotice),
    /// A receive-side error; the transport is still open
    Error { error: String },
    /// The remote end closed the channel
    Closed,
}

/// A signaling channel between the two endpoints of one call
#[async_trait]
pub trait SignalTransport: Send + Sync + fmt::Debug {
    fn delivery(&self) -> Delivery;

    /// Send a message, reporting the outcome
    async fn send(&self, message: &SignalMessage) -> SignalResult<()>;

    /// Fire-and-forget send: failures are logged and swallowed
    async fn send_best_effort(&self, message: &SignalMessage) -> bool {
        match self.send(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    call_id = %message.call_id,
                    kind = %message.kind(),
                    error = %e,
                    category = e.category(),
                    "Signal send failed, relying on later retransmission"
                );
                false
            }
        }
    }

    /// Fetch messages queued since the last poll
    ///
    /// Returns an empty batch when nothing is pending. Push transports
    /// always return an empty batch.
    async fn poll(&self, call_id: &CallId) -> SignalResult<Vec<SignalMessage>>;

    /// Take the inbound event receiver of a push transport
    ///
    /// Yields `Some` at most once; pull transports return `None`.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;

    async fn close(&self) -> SignalResult<()>;

    fn is_closed(&self) -> bool;
}

/// Opens a fresh transport per call attempt
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, call_id: &CallId, role: Role) -> SignalResult<Arc<dyn SignalTransport>>;
}
