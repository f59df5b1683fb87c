//! In-process signaling relay
//!
//! Implements the relay contract (accept a message tagged with a call id,
//! hand back everything queued for the other side since its last poll)
//! without a network hop. Used for local demos and for driving both ends
//! of a call in tests.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{SignalError, SignalResult};
use crate::message::{CallId, Role, SignalKind, SignalMessage, SignalPayload};
use crate::transport::{Delivery, SignalTransport, TransportEvent, TransportFactory};

type Mailbox = (CallId, Role);

#[derive(Clone, Default)]
pub struct InMemoryRelay {
    inner: Arc<RelayInner>,
}

#[derive(Default)]
struct RelayInner {
    queues: DashMap<Mailbox, VecDeque<SignalMessage>>,
    // Candidates returned on every poll when redelivery is enabled
    replay: DashMap<Mailbox, Vec<SignalMessage>>,
    opened: DashSet<Mailbox>,
    sent: DashMap<SignalKind, usize>,
    polls: AtomicUsize,
    unavailable: AtomicBool,
    redeliver_candidates: AtomicBool,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every candidate on every poll, like an HTTP relay that keeps
    /// the full candidate list per call
    pub fn with_candidate_redelivery(self) -> Self {
        self.inner.redeliver_candidates.store(true, Ordering::Relaxed);
        self
    }

    /// A pull endpoint for one side of a call
    pub fn endpoint(&self, call_id: CallId, role: Role) -> RelayEndpoint {
        RelayEndpoint {
            relay: self.clone(),
            call_id,
            role,
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate the relay going down or coming back
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        !self.inner.unavailable.load(Ordering::Relaxed)
    }

    /// Number of accepted messages of a kind
    pub fn sent_count(&self, kind: SignalKind) -> usize {
        self.inner.sent.get(&kind).map(|n| *n).unwrap_or(0)
    }

    /// Number of polls served, including failed ones
    pub fn poll_count(&self) -> usize {
        self.inner.polls.load(Ordering::Relaxed)
    }

    /// Messages waiting for `role` on `call_id`
    pub fn pending(&self, call_id: &CallId, role: Role) -> usize {
        self.inner
            .queues
            .get(&(call_id.clone(), role))
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Queue a message for `to` as if the other side had sent it
    pub fn inject(&self, to: Role, message: SignalMessage) {
        self.enqueue((message.call_id.clone(), to), message);
    }

    fn enqueue(&self, mailbox: Mailbox, message: SignalMessage) {
        let replay = self.inner.redeliver_candidates.load(Ordering::Relaxed)
            && matches!(message.payload, SignalPayload::Ice(_));
        if replay {
            self.inner.replay.entry(mailbox).or_default().push(message);
        } else {
            self.inner.queues.entry(mailbox).or_default().push_back(message);
        }
    }

    fn accept(&self, from: Role, message: &SignalMessage) -> SignalResult<()> {
        if !self.is_available() {
            return Err(SignalError::unavailable("in-memory relay offline"));
        }
        *self.inner.sent.entry(message.kind()).or_insert(0) += 1;
        trace!(call_id = %message.call_id, from = %from, kind = %message.kind(), "Relay accepted signal");
        self.enqueue((message.call_id.clone(), from.peer()), message.clone());
        Ok(())
    }

    fn drain(&self, mailbox: &Mailbox) -> SignalResult<Vec<SignalMessage>> {
        self.inner.polls.fetch_add(1, Ordering::Relaxed);
        if !self.is_available() {
            return Err(SignalError::unavailable("in-memory relay offline"));
        }
        let mut batch: Vec<SignalMessage> = self
            .inner
            .queues
            .get_mut(mailbox)
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default();
        if let Some(replay) = self.inner.replay.get(mailbox) {
            batch.extend(replay.iter().cloned());
        }
        Ok(batch)
    }

    fn reset_mailbox(&self, mailbox: &Mailbox) {
        self.inner.queues.remove(mailbox);
        self.inner.replay.remove(mailbox);
    }
}

impl fmt::Debug for InMemoryRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRelay")
            .field("mailboxes", &self.inner.queues.len())
            .field("polls", &self.poll_count())
            .field("available", &self.is_available())
            .finish()
    }
}

#[async_trait]
impl TransportFactory for InMemoryRelay {
    async fn open(&self, call_id: &CallId, role: Role) -> SignalResult<Arc<dyn SignalTransport>> {
        if !self.is_available() {
            return Err(SignalError::unavailable("in-memory relay offline"));
        }
        // A re-opened session never sees messages queued for the previous one
        let mailbox = (call_id.clone(), role);
        let reopened = !self.inner.opened.insert(mailbox.clone());
        if reopened {
            self.reset_mailbox(&mailbox);
        }
        debug!(call_id = %call_id, role = %role, reopened, "Opened relay endpoint");
        Ok(Arc::new(self.endpoint(call_id.clone(), role)))
    }
}

/// One side's view of an [`InMemoryRelay`]
pub struct RelayEndpoint {
    relay: InMemoryRelay,
    call_id: CallId,
    role: Role,
    closed: AtomicBool,
}

impl RelayEndpoint {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }
}

impl fmt::Debug for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEndpoint")
            .field("call_id", &self.call_id)
            .field("role", &self.role)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl SignalTransport for RelayEndpoint {
    fn delivery(&self) -> Delivery {
        Delivery::Pull
    }

    async fn send(&self, message: &SignalMessage) -> SignalResult<()> {
        if self.is_closed() {
            return Err(SignalError::Closed);
        }
        self.relay.accept(self.role, message)
    }

    async fn poll(&self, call_id: &CallId) -> SignalResult<Vec<SignalMessage>> {
        if self.is_closed() {
            return Err(SignalError::Closed);
        }
        self.relay.drain(&(call_id.clone(), self.role))
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        None
    }

    async fn close(&self) -> SignalResult<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{IceCandidate, SessionDescription};

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate::new(
            format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
            Some("0".into()),
            Some(0),
        )
    }

    #[tokio::test]
    async fn test_messages_route_to_the_other_side() {
        let relay = InMemoryRelay::new();
        let call = CallId::new("call-1");
        let caller = relay.endpoint(call.clone(), Role::Caller);
        let callee = relay.endpoint(call.clone(), Role::Callee);

        caller
            .send(&SignalMessage::offer(call.clone(), SessionDescription::offer("v=0")))
            .await
            .unwrap();

        assert!(caller.poll(&call).await.unwrap().is_empty());
        let batch = callee.poll(&call).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind(), SignalKind::Offer);
        assert!(callee.poll(&call).await.unwrap().is_empty());
        assert_eq!(relay.sent_count(SignalKind::Offer), 1);
    }

    #[tokio::test]
    async fn test_candidate_redelivery_repeats_candidates() {
        let relay = InMemoryRelay::new().with_candidate_redelivery();
        let call = CallId::new("call-2");
        let caller = relay.endpoint(call.clone(), Role::Caller);
        let callee = relay.endpoint(call.clone(), Role::Callee);

        caller.send(&SignalMessage::ice(call.clone(), candidate(1))).await.unwrap();
        assert_eq!(callee.poll(&call).await.unwrap().len(), 1);
        caller.send(&SignalMessage::ice(call.clone(), candidate(2))).await.unwrap();
        assert_eq!(callee.poll(&call).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_relay_fails_io() {
        let relay = InMemoryRelay::new();
        let call = CallId::new("call-3");
        let caller = relay.endpoint(call.clone(), Role::Caller);
        relay.set_available(false);

        assert!(caller.send(&SignalMessage::hangup(call.clone())).await.is_err());
        assert!(matches!(caller.poll(&call).await, Err(SignalError::Unavailable { .. })));
        assert!(!caller.send_best_effort(&SignalMessage::hangup(call.clone())).await);
        assert_eq!(relay.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_first_open_keeps_queued_offer() {
        let relay = InMemoryRelay::new();
        let call = CallId::new("call-4");
        relay.inject(Role::Callee, SignalMessage::offer(call.clone(), SessionDescription::offer("v=0")));

        let transport = relay.open(&call, Role::Callee).await.unwrap();
        assert_eq!(transport.poll(&call).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_clears_stale_mailbox() {
        let relay = InMemoryRelay::new();
        let call = CallId::new("call-5");
        let first = relay.open(&call, Role::Caller).await.unwrap();
        first.close().await.unwrap();
        relay.inject(Role::Caller, SignalMessage::answer(call.clone(), SessionDescription::answer("old")));
        assert_eq!(relay.pending(&call, Role::Caller), 1);

        let transport = relay.open(&call, Role::Caller).await.unwrap();
        assert!(transport.poll(&call).await.unwrap().is_empty());
    }
}
