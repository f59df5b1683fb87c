//! Offer/answer state machine for one peer connection
//!
//! ```text
//! Idle --start_offer--> OfferSent --answer--> Connected
//! Idle --offer--> OfferReceived --create answer--> AnswerPending --ICE connected--> Connected
//! Connected --renegotiate--> OfferSent
//! any --ICE failed--> Failed
//! ```
//!
//! The relay may lose, duplicate, or reorder messages, so every entry
//! point is idempotent: a description is applied at most once, and an ICE
//! candidate is applied at most once no matter how often it is delivered.
//! Candidates that arrive before a remote description exists are buffered
//! and applied in arrival order once it is set.
//!
//! A relay keyed only by call id may hand a peer back its own offer,
//! answer, or candidates. Anything this side produced is recognized and
//! dropped before it reaches the peer connection.
//!
//! Errors while applying the first offer/answer end the session with
//! [`CallError::NegotiationFailed`]. Later errors are logged and skipped.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use peercall_signal_core::{
    CandidateKey, CallId, IceCandidate, Role, SessionDescription, SignalMessage, SignalPayload, SignalTransport,
    with_timeout,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{CallError, CallResult};
use crate::peer::{ConnectionState, PeerConnection};
use crate::sdp::NegotiationOptions;

// Sends that failed are retried after the next healthy poll or send
const MAX_UNSENT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerPending,
    Connected,
    Failed,
    Closed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferSent => "offer_sent",
            NegotiationState::OfferReceived => "offer_received",
            NegotiationState::AnswerPending => "answer_pending",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Tie-break when both sides offer at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlarePolicy {
    /// The caller keeps its offer; the callee rolls back and answers
    #[default]
    CallerWins,
}

impl GlarePolicy {
    fn local_offer_wins(&self, role: Role) -> bool {
        match self {
            GlarePolicy::CallerWins => role == Role::Caller,
        }
    }
}

/// Point-in-time view of the negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationSnapshot {
    pub state: NegotiationState,
    pub local_description_set: bool,
    pub remote_description_set: bool,
    pub pending_candidates: usize,
    pub applied_candidates: usize,
    pub rejected_candidates: usize,
    pub renegotiating: bool,
}

pub struct Negotiator {
    call_id: CallId,
    role: Role,
    peer: Arc<dyn PeerConnection>,
    transport: Arc<dyn SignalTransport>,
    options: NegotiationOptions,
    glare: GlarePolicy,
    step_timeout: Duration,

    state: NegotiationState,
    local_description_set: bool,
    remote_description_set: bool,
    last_remote: Option<SessionDescription>,
    local_sdps: HashSet<String>,
    local_candidate_keys: HashSet<CandidateKey>,
    cached_answer: Option<SessionDescription>,
    pending_candidates: Vec<IceCandidate>,
    pending_keys: HashSet<CandidateKey>,
    applied_candidate_keys: HashSet<CandidateKey>,
    rejected_candidate_keys: HashSet<CandidateKey>,
    unsent: VecDeque<SignalMessage>,
    connectivity_confirmed: bool,
    initial_complete: bool,
    renegotiating: bool,
}

impl fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiator")
            .field("call_id", &self.call_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("applied_candidates", &self.applied_candidate_keys.len())
            .finish()
    }
}

impl Negotiator {
    pub fn new(
        call_id: CallId,
        role: Role,
        peer: Arc<dyn PeerConnection>,
        transport: Arc<dyn SignalTransport>,
        options: NegotiationOptions,
        step_timeout: Duration,
    ) -> Self {
        Self {
            call_id,
            role,
            peer,
            transport,
            options,
            glare: GlarePolicy::default(),
            step_timeout,
            state: NegotiationState::Idle,
            local_description_set: false,
            remote_description_set: false,
            last_remote: None,
            local_sdps: HashSet::new(),
            local_candidate_keys: HashSet::new(),
            cached_answer: None,
            pending_candidates: Vec::new(),
            pending_keys: HashSet::new(),
            applied_candidate_keys: HashSet::new(),
            rejected_candidate_keys: HashSet::new(),
            unsent: VecDeque::new(),
            connectivity_confirmed: false,
            initial_complete: false,
            renegotiating: false,
        }
    }

    pub fn with_glare_policy(mut self, policy: GlarePolicy) -> Self {
        self.glare = policy;
        self
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_applied(&self, candidate: &IceCandidate) -> bool {
        self.applied_candidate_keys.contains(&candidate.key())
    }

    pub fn snapshot(&self) -> NegotiationSnapshot {
        NegotiationSnapshot {
            state: self.state,
            local_description_set: self.local_description_set,
            remote_description_set: self.remote_description_set,
            pending_candidates: self.pending_candidates.len(),
            applied_candidates: self.applied_candidate_keys.len(),
            rejected_candidates: self.rejected_candidate_keys.len(),
            renegotiating: self.renegotiating,
        }
    }

    /// Caller path: create, apply, and send the first offer
    pub async fn start_offer(&mut self) -> CallResult<()> {
        if self.state != NegotiationState::Idle {
            return Err(CallError::invalid_state("idle", self.state.to_string()));
        }
        match self.send_offer(false).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_initial("create offer", e)),
        }
    }

    /// Start a fresh offer/answer cycle on a connected session
    pub async fn renegotiate(&mut self, ice_restart: bool) -> CallResult<()> {
        if self.state != NegotiationState::Connected {
            return Err(CallError::invalid_state("connected", self.state.to_string()));
        }
        info!(call_id = %self.call_id, ice_restart, "Starting renegotiation");
        self.renegotiating = true;
        if let Err(e) = self.send_offer(ice_restart).await {
            warn!(call_id = %self.call_id, error = %e, "Renegotiation offer failed, keeping current session");
            self.renegotiating = false;
            self.state = NegotiationState::Connected;
            return Err(e);
        }
        Ok(())
    }

    async fn send_offer(&mut self, ice_restart: bool) -> CallResult<()> {
        let offer = with_timeout("create_offer", self.step_timeout, self.peer.create_offer(ice_restart)).await?;
        let offer = SessionDescription::offer(self.options.apply(&offer.sdp));
        with_timeout("set_local_description", self.step_timeout, self.peer.set_local_description(&offer)).await?;
        self.local_description_set = true;
        self.local_sdps.insert(offer.sdp.clone());
        self.transition(NegotiationState::OfferSent);
        self.send(SignalMessage::offer(self.call_id.clone(), offer)).await;
        Ok(())
    }

    /// Apply one inbound message
    ///
    /// Hangups are not handled here; the session driver intercepts them.
    pub async fn handle_message(&mut self, message: SignalMessage) -> CallResult<()> {
        if message.call_id != self.call_id {
            warn!(
                call_id = %self.call_id,
                other = %message.call_id,
                kind = %message.kind(),
                "Dropping signal for another call"
            );
            return Ok(());
        }
        if self.state.is_terminal() {
            trace!(call_id = %self.call_id, kind = %message.kind(), state = %self.state, "Ignoring signal after negotiation ended");
            return Ok(());
        }
        match message.payload {
            SignalPayload::Offer(description) | SignalPayload::Answer(description)
                if self.local_sdps.contains(&description.sdp) =>
            {
                trace!(call_id = %self.call_id, sdp_type = ?description.sdp_type, "Ignoring echo of local description");
                Ok(())
            }
            SignalPayload::Offer(offer) => self.handle_offer(offer).await,
            SignalPayload::Answer(answer) => self.handle_answer(answer).await,
            SignalPayload::Ice(candidate) => {
                self.handle_candidate(candidate).await;
                Ok(())
            }
            SignalPayload::Hangup => Ok(()),
        }
    }

    async fn handle_offer(&mut self, offer: SessionDescription) -> CallResult<()> {
        if self.last_remote.as_ref() == Some(&offer) {
            if self.state == NegotiationState::AnswerPending {
                if let Some(answer) = self.cached_answer.clone() {
                    debug!(call_id = %self.call_id, "Duplicate offer, re-sending answer");
                    self.send(SignalMessage::answer(self.call_id.clone(), answer)).await;
                }
            } else {
                debug!(call_id = %self.call_id, state = %self.state, "Ignoring duplicate offer");
            }
            return Ok(());
        }

        match self.state {
            NegotiationState::Idle => self.answer_offer(offer).await,
            NegotiationState::OfferSent => {
                if self.glare.local_offer_wins(self.role) {
                    info!(call_id = %self.call_id, role = %self.role, "Offer collision, keeping local offer");
                    return Ok(());
                }
                info!(call_id = %self.call_id, role = %self.role, "Offer collision, rolling back local offer");
                let rollback = SessionDescription::rollback();
                if let Err(e) = with_timeout(
                    "rollback",
                    self.step_timeout,
                    self.peer.set_local_description(&rollback),
                )
                .await
                {
                    if !self.initial_complete {
                        return Err(self.fail_initial("roll back local offer", e));
                    }
                    warn!(call_id = %self.call_id, error = %e, "Rollback rejected, ignoring remote offer");
                    return Ok(());
                }
                self.local_description_set = self.initial_complete;
                self.answer_offer(offer).await
            }
            NegotiationState::Connected | NegotiationState::AnswerPending => {
                info!(call_id = %self.call_id, "Remote side renegotiating");
                self.renegotiating = true;
                self.answer_offer(offer).await
            }
            NegotiationState::OfferReceived | NegotiationState::Failed | NegotiationState::Closed => {
                debug!(call_id = %self.call_id, state = %self.state, "Ignoring offer");
                Ok(())
            }
        }
    }

    /// Callee path: apply the offer, answer it, send the answer
    async fn answer_offer(&mut self, offer: SessionDescription) -> CallResult<()> {
        // A rolled-back renegotiation offer falls back to the live session
        let fallback = match self.state {
            NegotiationState::OfferSent => NegotiationState::Connected,
            other => other,
        };
        self.transition(NegotiationState::OfferReceived);

        let result = async {
            with_timeout(
                "set_remote_description",
                self.step_timeout,
                self.peer.set_remote_description(&offer),
            )
            .await?;
            self.remote_description_set = true;
            self.last_remote = Some(offer);
            self.flush_pending().await;

            let answer = with_timeout("create_answer", self.step_timeout, self.peer.create_answer()).await?;
            let answer = SessionDescription::answer(self.options.apply(&answer.sdp));
            with_timeout(
                "set_local_description",
                self.step_timeout,
                self.peer.set_local_description(&answer),
            )
            .await?;
            self.local_sdps.insert(answer.sdp.clone());
            Ok::<_, CallError>(answer)
        }
        .await;

        let answer = match result {
            Ok(answer) => answer,
            Err(e) if !self.initial_complete => return Err(self.fail_initial("answer offer", e)),
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Renegotiation offer rejected, keeping current session");
                self.renegotiating = false;
                self.transition(fallback);
                return Ok(());
            }
        };

        self.local_description_set = true;
        self.cached_answer = Some(answer.clone());
        let next = if self.renegotiating && self.connectivity_confirmed {
            NegotiationState::Connected
        } else {
            NegotiationState::AnswerPending
        };
        self.transition(next);
        self.renegotiating = false;
        self.initial_complete = true;
        self.send(SignalMessage::answer(self.call_id.clone(), answer)).await;
        Ok(())
    }

    async fn handle_answer(&mut self, answer: SessionDescription) -> CallResult<()> {
        if self.last_remote.as_ref() == Some(&answer) {
            debug!(call_id = %self.call_id, state = %self.state, "Ignoring duplicate answer");
            return Ok(());
        }
        if self.state != NegotiationState::OfferSent {
            debug!(call_id = %self.call_id, state = %self.state, "Ignoring unexpected answer");
            return Ok(());
        }

        let applied = with_timeout(
            "set_remote_description",
            self.step_timeout,
            self.peer.set_remote_description(&answer),
        )
        .await;
        if let Err(e) = applied {
            if !self.initial_complete {
                return Err(self.fail_initial("apply answer", e));
            }
            warn!(call_id = %self.call_id, error = %e, "Renegotiation answer rejected, keeping current session");
            self.renegotiating = false;
            self.transition(NegotiationState::Connected);
            return Ok(());
        }

        self.remote_description_set = true;
        self.last_remote = Some(answer);
        self.renegotiating = false;
        self.initial_complete = true;
        self.transition(NegotiationState::Connected);
        self.flush_pending().await;
        Ok(())
    }

    async fn handle_candidate(&mut self, candidate: IceCandidate) {
        if candidate.is_end_of_candidates() {
            trace!(call_id = %self.call_id, "Remote gathering complete");
            return;
        }
        let key = candidate.key();
        if self.local_candidate_keys.contains(&key) {
            trace!(call_id = %self.call_id, candidate = %key, "Ignoring echo of local candidate");
            return;
        }
        if self.applied_candidate_keys.contains(&key)
            || self.rejected_candidate_keys.contains(&key)
            || self.pending_keys.contains(&key)
        {
            trace!(call_id = %self.call_id, candidate = %key, "Ignoring redelivered candidate");
            return;
        }
        if !self.remote_description_set {
            debug!(
                call_id = %self.call_id,
                buffered = self.pending_candidates.len() + 1,
                "Buffering candidate until remote description is set"
            );
            self.pending_keys.insert(key);
            self.pending_candidates.push(candidate);
            return;
        }
        self.apply_candidate(candidate, key).await;
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate, key: CandidateKey) {
        match with_timeout(
            "add_ice_candidate",
            self.step_timeout,
            self.peer.add_ice_candidate(&candidate),
        )
        .await
        {
            Ok(()) => {
                trace!(call_id = %self.call_id, candidate = %key, "Applied remote candidate");
                self.applied_candidate_keys.insert(key);
            }
            Err(e) => {
                warn!(call_id = %self.call_id, candidate = %key, error = %e, "Skipping rejected candidate");
                self.rejected_candidate_keys.insert(key);
            }
        }
    }

    async fn flush_pending(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_candidates);
        self.pending_keys.clear();
        debug!(call_id = %self.call_id, count = pending.len(), "Applying buffered candidates");
        for candidate in pending {
            let key = candidate.key();
            self.apply_candidate(candidate, key).await;
        }
    }

    /// Trickle a locally gathered candidate to the remote side
    pub async fn send_local_candidate(&mut self, candidate: IceCandidate) {
        self.local_candidate_keys.insert(candidate.key());
        self.send(SignalMessage::ice(self.call_id.clone(), candidate)).await;
    }

    /// Retry sends that failed earlier; stops at the first failure
    pub async fn retry_unsent(&mut self) {
        while let Some(message) = self.unsent.pop_front() {
            if !self.transport.send_best_effort(&message).await {
                self.unsent.push_front(message);
                return;
            }
            debug!(call_id = %self.call_id, kind = %message.kind(), "Re-sent signal after relay recovered");
        }
    }

    pub fn unsent_count(&self) -> usize {
        self.unsent.len()
    }

    async fn send(&mut self, message: SignalMessage) {
        // Earlier failures go out first so the remote side sees them in order
        if !self.unsent.is_empty() {
            self.retry_unsent().await;
        }
        if self.unsent.is_empty() && self.transport.send_best_effort(&message).await {
            return;
        }
        if self.unsent.len() >= MAX_UNSENT {
            self.unsent.pop_front();
        }
        self.unsent.push_back(message);
    }

    /// Fold a connectivity change into the negotiation state
    pub fn on_connection_state(&mut self, connection: ConnectionState) -> NegotiationState {
        match connection {
            ConnectionState::Connected => {
                self.connectivity_confirmed = true;
                if self.state == NegotiationState::AnswerPending {
                    self.transition(NegotiationState::Connected);
                }
            }
            ConnectionState::Failed => {
                if !self.state.is_terminal() {
                    self.transition(NegotiationState::Failed);
                }
            }
            ConnectionState::Closed => self.close(),
            ConnectionState::New | ConnectionState::Checking | ConnectionState::Disconnected => {}
        }
        self.state
    }

    pub fn close(&mut self) {
        if self.state != NegotiationState::Closed {
            self.transition(NegotiationState::Closed);
        }
    }

    fn fail_initial(&mut self, step: &str, error: CallError) -> CallError {
        warn!(call_id = %self.call_id, step, error = %error, "Initial negotiation failed");
        self.transition(NegotiationState::Failed);
        CallError::negotiation_failed(format!("{}: {}", step, error))
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state == next {
            return;
        }
        debug!(call_id = %self.call_id, role = %self.role, from = %self.state, to = %next, "Negotiation state changed");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(NegotiationState::Failed.is_terminal());
        assert!(NegotiationState::Closed.is_terminal());
        assert!(!NegotiationState::Connected.is_terminal());
        assert!(!NegotiationState::AnswerPending.is_terminal());
    }

    #[test]
    fn test_caller_wins_glare() {
        let policy = GlarePolicy::default();
        assert!(policy.local_offer_wins(Role::Caller));
        assert!(!policy.local_offer_wins(Role::Callee));
    }
}
