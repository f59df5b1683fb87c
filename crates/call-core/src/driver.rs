//! Per-call driver task
//!
//! One task per call owns the negotiator, the quality pipeline, and every
//! timer of the call. All wake-ups (relay polls, pushed signals, peer
//! callbacks, stats ticks, controller commands) are multiplexed through a
//! single `select!`, so the call's state is only ever touched from here.
//! Cancelling the token or aborting the task drops every timer at once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::pending;
use parking_lot::Mutex;
use peercall_quality_core::{DeviceState, QualityRating, VideoProfile};
use peercall_signal_core::{
    CallId, Delivery, PollOutcome, PollScheduler, Role, SignalMessage, SignalPayload, SignalTransport,
    TransportEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::adaptation::{AdaptationOutcome, MediaAdapter};
use crate::controller::ControllerInner;
use crate::error::{CallError, CallResult};
use crate::events::{CallEndReason, CallEvent, CallState, Diagnostic};
use crate::media::MediaStream;
use crate::negotiation::{NegotiationSnapshot, Negotiator};
use crate::peer::{ConnectionState, PeerConnection, PeerEvent};

pub(crate) enum DriverCommand {
    Renegotiate {
        ice_restart: bool,
        reply: oneshot::Sender<CallResult<()>>,
    },
    UpdateDevice(DeviceState),
}

pub(crate) enum DriverExit {
    /// The controller tore the call down
    Cancelled,
    Ended(CallEndReason),
    Failed(CallError),
}

/// Resources the controller needs for teardown and snapshots
pub(crate) struct CallResources {
    pub role: Role,
    pub transport: Option<Arc<dyn SignalTransport>>,
    pub peer: Option<Arc<dyn PeerConnection>>,
    pub local_stream: Option<Arc<dyn MediaStream>>,
    pub remote_attached: bool,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub negotiation: Option<NegotiationSnapshot>,
    pub bitrate_bps: u64,
    pub profile: VideoProfile,
    pub last_rating: Option<QualityRating>,
    pub reconnect_attempts: u32,
}

impl CallResources {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            transport: None,
            peer: None,
            local_stream: None,
            remote_attached: false,
            started_at: Utc::now(),
            connected_at: None,
            negotiation: None,
            bitrate_bps: 0,
            profile: VideoProfile::Medium,
            last_rating: None,
            reconnect_attempts: 0,
        }
    }
}

enum Flow {
    Continue,
    Ended(CallEndReason),
    Failure(CallError),
}

enum SessionExit {
    Cancelled,
    Ended(CallEndReason),
    Failed(CallError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatheringWatch {
    /// No local description yet
    Waiting,
    Armed(Instant),
    Done,
}

impl GatheringWatch {
    fn deadline(&self) -> Option<Instant> {
        match self {
            GatheringWatch::Armed(at) => Some(*at),
            _ => None,
        }
    }
}

/// One negotiated attempt: a fresh transport, peer connection, and negotiator
struct Session {
    transport: Arc<dyn SignalTransport>,
    peer: Arc<dyn PeerConnection>,
    peer_events: mpsc::Receiver<PeerEvent>,
    transport_events: Option<mpsc::Receiver<TransportEvent>>,
    negotiator: Negotiator,
    poll: Option<PollScheduler>,
    next_poll: Option<Instant>,
    gathering: GatheringWatch,
    stats_timer: Option<Interval>,
    connected: bool,
}

pub(crate) struct CallDriver {
    inner: Arc<ControllerInner>,
    call_id: CallId,
    role: Role,
    token: CancellationToken,
    commands: mpsc::Receiver<DriverCommand>,
    resources: Arc<Mutex<CallResources>>,
    adapter: MediaAdapter,
    device: DeviceState,
    local_stream: Option<Arc<dyn MediaStream>>,
    reconnect_attempts: u32,
}

impl CallDriver {
    pub(crate) fn new(
        inner: Arc<ControllerInner>,
        call_id: CallId,
        role: Role,
        token: CancellationToken,
        commands: mpsc::Receiver<DriverCommand>,
        resources: Arc<Mutex<CallResources>>,
    ) -> Self {
        let adapter = MediaAdapter::new(&inner.config);
        let device = inner.device_state();
        {
            let mut shared = resources.lock();
            shared.bitrate_bps = adapter.current_bps();
            shared.profile = adapter.profile();
        }
        Self {
            inner,
            call_id,
            role,
            token,
            commands,
            resources,
            adapter,
            device,
            local_stream: None,
            reconnect_attempts: 0,
        }
    }

    /// Run the call to completion
    ///
    /// `ready` is answered once setup succeeds; on a setup failure it is
    /// left for the caller to answer after teardown.
    pub(crate) async fn run(mut self, ready: &mut Option<oneshot::Sender<CallResult<()>>>) -> DriverExit {
        self.inner.set_state(&self.call_id, CallState::AcquiringMedia);
        let constraints = self.inner.config.media.clone().with_profile(self.adapter.profile());
        let stream = match self.inner.deps.media.acquire_local_media(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Local media unavailable");
                return DriverExit::Failed(e);
            }
        };
        debug!(call_id = %self.call_id, stream = stream.id(), audio = stream.has_audio(), video = stream.has_video(), "Acquired local media");
        self.resources.lock().local_stream = Some(stream.clone());
        self.local_stream = Some(stream);

        self.inner.set_state(&self.call_id, CallState::Negotiating);
        let mut session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, category = e.category(), "Call setup failed");
                return DriverExit::Failed(e);
            }
        };
        if let Some(ready) = ready.take() {
            let _ = ready.send(Ok(()));
        }

        loop {
            let failure = match self.drive(&mut session).await {
                SessionExit::Cancelled => return DriverExit::Cancelled,
                SessionExit::Ended(reason) => {
                    info!(call_id = %self.call_id, reason = %reason, "Call ended");
                    return DriverExit::Ended(reason);
                }
                SessionExit::Failed(error) => error,
            };

            let budget = self.inner.config.max_reconnect_attempts;
            if !failure.is_recoverable() || self.reconnect_attempts >= budget {
                error!(
                    call_id = %self.call_id,
                    error = %failure,
                    attempts = self.reconnect_attempts,
                    "Call failed"
                );
                return DriverExit::Failed(failure);
            }

            self.reconnect_attempts += 1;
            let attempt = self.reconnect_attempts;
            self.resources.lock().reconnect_attempts = attempt;
            warn!(call_id = %self.call_id, attempt, error = %failure, "Reconnecting call");
            self.inner.set_state(&self.call_id, CallState::Reconnecting);
            self.inner.emit(CallEvent::Reconnecting {
                call_id: self.call_id.clone(),
                attempt,
            });

            self.close_session(session).await;
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return DriverExit::Cancelled,
                _ = sleep(self.inner.config.reconnect_delay()) => {}
            }

            self.inner.set_state(&self.call_id, CallState::Negotiating);
            session = match self.open_session().await {
                Ok(session) => session,
                Err(e) => {
                    error!(call_id = %self.call_id, error = %e, "Reconnect failed");
                    return DriverExit::Failed(e);
                }
            };
        }
    }

    async fn open_session(&mut self) -> CallResult<Session> {
        let transport = self
            .inner
            .deps
            .transports
            .open(&self.call_id, self.role)
            .await
            .map_err(|e| CallError::signaling_unavailable(e.to_string()))?;
        self.resources.lock().transport = Some(transport.clone());

        let (peer, peer_events) = self.inner.deps.peers.create(&self.inner.config.peer).await?;
        self.resources.lock().peer = Some(peer.clone());
        if let Some(stream) = &self.local_stream {
            peer.add_local_stream(stream.clone()).await?;
        }

        let config = &self.inner.config;
        let (poll, next_poll) = match transport.delivery() {
            Delivery::Pull => (Some(PollScheduler::new(config.poll.clone())), Some(Instant::now())),
            Delivery::Push => (None, None),
        };
        let negotiator = Negotiator::new(
            self.call_id.clone(),
            self.role,
            peer.clone(),
            transport.clone(),
            config.negotiation.clone(),
            config.negotiation_timeout(),
        );
        let mut session = Session {
            transport_events: transport.take_events(),
            transport,
            peer,
            peer_events,
            negotiator,
            poll,
            next_poll,
            gathering: GatheringWatch::Waiting,
            stats_timer: None,
            connected: false,
        };

        if self.role == Role::Caller {
            session.negotiator.start_offer().await?;
            self.arm_gathering(&mut session);
        }
        self.publish_negotiation(&session);
        info!(call_id = %self.call_id, role = %self.role, "Signaling session open");
        Ok(session)
    }

    async fn close_session(&mut self, mut session: Session) {
        session.negotiator.close();
        if let Err(e) = session.peer.close().await {
            debug!(call_id = %self.call_id, error = %e, "Closing failed peer connection");
        }
        if let Err(e) = session.transport.close().await {
            debug!(call_id = %self.call_id, error = %e, "Closing signal transport");
        }
        let mut resources = self.resources.lock();
        resources.peer = None;
        resources.transport = None;
    }

    async fn drive(&mut self, session: &mut Session) -> SessionExit {
        loop {
            let flow = tokio::select! {
                biased;
                _ = self.token.cancelled() => return SessionExit::Cancelled,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(session, command).await,
                    None => return SessionExit::Cancelled,
                },
                event = session.peer_events.recv() => match event {
                    Some(event) => self.handle_peer_event(session, event).await,
                    None => Flow::Failure(CallError::connection_lost("peer connection went away")),
                },
                event = recv_optional(&mut session.transport_events) => {
                    self.handle_transport_event(session, event).await
                }
                _ = sleep_until_optional(session.next_poll) => self.poll_relay(session).await,
                _ = sleep_until_optional(session.gathering.deadline()) => {
                    self.gathering_timed_out(session);
                    Flow::Continue
                }
                _ = tick_optional(&mut session.stats_timer) => {
                    self.sample_quality(session).await;
                    Flow::Continue
                }
            };
            self.publish_negotiation(session);

            match flow {
                Flow::Continue => {}
                Flow::Ended(reason) => return SessionExit::Ended(reason),
                Flow::Failure(error) => return SessionExit::Failed(error),
            }
        }
    }

    async fn handle_command(&mut self, session: &mut Session, command: DriverCommand) -> Flow {
        match command {
            DriverCommand::Renegotiate { ice_restart, reply } => {
                let result = session.negotiator.renegotiate(ice_restart).await;
                let _ = reply.send(result);
            }
            DriverCommand::UpdateDevice(device) => {
                debug!(call_id = %self.call_id, ceiling = %device.ceiling(), "Device state updated");
                self.device = device;
            }
        }
        Flow::Continue
    }

    async fn handle_signal(&mut self, session: &mut Session, message: SignalMessage) -> Flow {
        if message.payload == SignalPayload::Hangup && message.call_id == self.call_id {
            info!(call_id = %self.call_id, "Remote side hung up");
            return Flow::Ended(CallEndReason::RemoteHangup);
        }
        match session.negotiator.handle_message(message).await {
            Ok(()) => {
                self.arm_gathering(session);
                Flow::Continue
            }
            Err(e) => Flow::Failure(e),
        }
    }

    async fn handle_transport_event(&mut self, session: &mut Session, event: Option<TransportEvent>) -> Flow {
        match event {
            Some(TransportEvent::Message(message)) => {
                session.negotiator.retry_unsent().await;
                self.handle_signal(session, message).await
            }
            Some(TransportEvent::Control(notice)) => {
                debug!(call_id = %self.call_id, ?notice, "Relay notice");
                self.inner.emit(CallEvent::Diagnostic {
                    call_id: self.call_id.clone(),
                    diagnostic: Diagnostic::Signaling(notice),
                });
                Flow::Continue
            }
            Some(TransportEvent::Error { error }) => {
                warn!(call_id = %self.call_id, error = %error, "Signal channel error");
                Flow::Continue
            }
            Some(TransportEvent::Closed) | None => {
                session.transport_events = None;
                Flow::Failure(CallError::signaling_unavailable("relay closed the signal channel"))
            }
        }
    }

    async fn poll_relay(&mut self, session: &mut Session) -> Flow {
        let Some(scheduler) = session.poll.as_mut() else {
            session.next_poll = None;
            return Flow::Continue;
        };

        match session.transport.poll(&self.call_id).await {
            Ok(batch) => {
                let interval = scheduler.on_success();
                session.next_poll = Some(Instant::now() + interval);
                if !batch.is_empty() {
                    trace!(call_id = %self.call_id, count = batch.len(), "Polled signals");
                }
                session.negotiator.retry_unsent().await;
                for message in batch {
                    let flow = self.handle_signal(session, message).await;
                    if !matches!(flow, Flow::Continue) {
                        return flow;
                    }
                }
                Flow::Continue
            }
            Err(e) => match scheduler.on_failure() {
                PollOutcome::Retry(delay) => {
                    warn!(
                        call_id = %self.call_id,
                        error = %e,
                        failures = scheduler.consecutive_failures(),
                        next_poll_ms = delay.as_millis() as u64,
                        "Signal poll failed"
                    );
                    session.next_poll = Some(Instant::now() + delay);
                    Flow::Continue
                }
                PollOutcome::Escalate { failures } => {
                    error!(call_id = %self.call_id, error = %e, failures, "Relay unreachable");
                    session.next_poll = None;
                    Flow::Failure(CallError::signaling_unavailable(format!(
                        "{} consecutive poll failures: {}",
                        failures, e
                    )))
                }
            },
        }
    }

    async fn handle_peer_event(&mut self, session: &mut Session, event: PeerEvent) -> Flow {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                session.gathering = GatheringWatch::Done;
                session.negotiator.send_local_candidate(candidate).await;
                Flow::Continue
            }
            PeerEvent::GatheringComplete => {
                debug!(call_id = %self.call_id, "Local ICE gathering complete");
                Flow::Continue
            }
            PeerEvent::ConnectionStateChanged(state) => self.on_connection_state(session, state).await,
            PeerEvent::RemoteStream(stream) => {
                let stream_id = stream.id().to_string();
                if let Err(e) = self.inner.deps.render.attach_remote_stream(stream).await {
                    warn!(call_id = %self.call_id, stream = %stream_id, error = %e, "Failed to attach remote stream");
                    return Flow::Continue;
                }
                self.resources.lock().remote_attached = true;
                self.inner.emit(CallEvent::RemoteStreamAttached {
                    call_id: self.call_id.clone(),
                    stream_id,
                });
                Flow::Continue
            }
        }
    }

    async fn on_connection_state(&mut self, session: &mut Session, state: ConnectionState) -> Flow {
        let negotiation = session.negotiator.on_connection_state(state);
        debug!(call_id = %self.call_id, connection = %state, negotiation = %negotiation, "Peer connection state");

        match state {
            ConnectionState::Connected => {
                if session.connected {
                    return Flow::Continue;
                }
                session.connected = true;
                self.reconnect_attempts = 0;
                {
                    let mut resources = self.resources.lock();
                    resources.connected_at.get_or_insert_with(Utc::now);
                    resources.reconnect_attempts = 0;
                }
                self.inner.set_state(&self.call_id, CallState::Connected);

                self.adapter.restart();
                let period = self.inner.config.stats_interval();
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                session.stats_timer = Some(timer);
                // Baseline for the first interval
                self.sample_quality(session).await;
                Flow::Continue
            }
            ConnectionState::Disconnected => {
                warn!(call_id = %self.call_id, "Connectivity interrupted");
                self.inner.emit(CallEvent::Diagnostic {
                    call_id: self.call_id.clone(),
                    diagnostic: Diagnostic::ConnectionInterrupted,
                });
                Flow::Continue
            }
            ConnectionState::Failed => Flow::Failure(CallError::connection_lost("ICE connectivity failed")),
            ConnectionState::Closed => Flow::Failure(CallError::connection_lost("peer connection closed")),
            ConnectionState::New | ConnectionState::Checking => Flow::Continue,
        }
    }

    fn arm_gathering(&self, session: &mut Session) {
        if session.gathering == GatheringWatch::Waiting && session.negotiator.snapshot().local_description_set {
            session.gathering = GatheringWatch::Armed(Instant::now() + self.inner.config.ice_gathering_timeout());
        }
    }

    fn gathering_timed_out(&self, session: &mut Session) {
        session.gathering = GatheringWatch::Done;
        let timeout_ms = self.inner.config.ice_gathering_timeout_ms;
        warn!(call_id = %self.call_id, timeout_ms, "No local ICE candidates gathered");
        self.inner.emit(CallEvent::Diagnostic {
            call_id: self.call_id.clone(),
            diagnostic: Diagnostic::IceGatheringTimeout { timeout_ms },
        });
    }

    async fn sample_quality(&mut self, session: &mut Session) {
        let snapshot = match session.peer.stats().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!(call_id = %self.call_id, error = %e, "Stats unavailable, skipping tick");
                return;
            }
        };
        let Some(outcome) = self.adapter.on_snapshot(snapshot, &self.device) else {
            return;
        };
        self.apply_outcome(session, outcome).await;
    }

    async fn apply_outcome(&mut self, session: &mut Session, outcome: AdaptationOutcome) {
        let AdaptationOutcome {
            update,
            bitrate_change,
            profile_change,
            encoding,
        } = outcome;

        if !encoding.is_empty() {
            if let Err(e) = session.peer.set_encoding(&encoding).await {
                warn!(call_id = %self.call_id, error = %e, "Failed to apply encoding parameters");
            }
        }

        {
            let mut resources = self.resources.lock();
            resources.last_rating = Some(update.assessment.overall);
            resources.bitrate_bps = self.adapter.current_bps();
            resources.profile = self.adapter.profile();
        }

        if let Some(change) = update.change {
            self.inner.emit(CallEvent::QualityChanged {
                call_id: self.call_id.clone(),
                previous: change.previous.map(|p| p.overall),
                assessment: update.assessment,
                score: update.score,
                trend: update.trend,
            });
        }
        if let Some(alert) = update.alert {
            self.inner.emit(CallEvent::QualityAlert {
                call_id: self.call_id.clone(),
                rating: alert.rating,
                message: alert.message,
            });
        }
        if let Some((previous_bps, current_bps)) = bitrate_change {
            self.inner.emit(CallEvent::BitrateChanged {
                call_id: self.call_id.clone(),
                previous_bps,
                current_bps,
            });
        }
        if let Some(decision) = profile_change {
            self.inner.emit(CallEvent::ProfileChanged {
                call_id: self.call_id.clone(),
                previous: decision.previous,
                current: decision.profile,
                width: decision.width,
                height: decision.height,
                frame_rate: decision.frame_rate,
            });
        }
    }

    fn publish_negotiation(&self, session: &Session) {
        self.resources.lock().negotiation = Some(session.negotiator.snapshot());
    }
}

async fn recv_optional<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn tick_optional(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}
