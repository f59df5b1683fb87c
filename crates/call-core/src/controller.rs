//! Session controller
//!
//! Owns at most one call at a time. Each call runs on its own driver task
//! (see [`crate::driver`]) holding a fresh transport, peer connection, and
//! negotiator. The controller keeps the cancellation token and join handle
//! of that task, so teardown stops every poll and timer of the call before
//! it returns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use peercall_quality_core::{DeviceState, QualityRating, VideoProfile};
use peercall_signal_core::{CallId, Role, SignalMessage, TransportFactory};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CallConfig;
use crate::driver::{CallDriver, CallResources, DriverCommand, DriverExit};
use crate::error::{CallError, CallResult};
use crate::events::{CallEndReason, CallEvent, CallState};
use crate::media::{CallLog, CallRecord, MediaSource, RenderSink};
use crate::negotiation::NegotiationState;
use crate::peer::PeerConnectionFactory;

const COMMAND_CAPACITY: usize = 16;

/// External collaborators of a session
#[derive(Clone)]
pub struct CallDependencies {
    pub transports: Arc<dyn TransportFactory>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub media: Arc<dyn MediaSource>,
    pub render: Arc<dyn RenderSink>,
    pub call_log: Option<Arc<dyn CallLog>>,
}

impl CallDependencies {
    pub fn new(
        transports: Arc<dyn TransportFactory>,
        peers: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaSource>,
        render: Arc<dyn RenderSink>,
    ) -> Self {
        Self {
            transports,
            peers,
            media,
            render,
            call_log: None,
        }
    }

    /// Use the relay transport named by `config.signal_url`
    pub fn from_config(
        config: &CallConfig,
        peers: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaSource>,
        render: Arc<dyn RenderSink>,
    ) -> CallResult<Self> {
        Ok(Self::new(config.transport_factory()?, peers, media, render))
    }

    pub fn with_call_log(mut self, call_log: Arc<dyn CallLog>) -> Self {
        self.call_log = Some(call_log);
        self
    }
}

/// Point-in-time view of the active call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub role: Role,
    pub state: CallState,
    pub negotiation_state: Option<NegotiationState>,
    pub local_description_set: bool,
    pub remote_description_set: bool,
    pub pending_candidates: usize,
    pub applied_candidates: usize,
    pub bitrate_bps: u64,
    pub profile: VideoProfile,
    pub last_rating: Option<QualityRating>,
    pub reconnect_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

struct ActiveCall {
    session_id: Uuid,
    call_id: CallId,
    token: CancellationToken,
    driver: Option<JoinHandle<()>>,
    commands: mpsc::Sender<DriverCommand>,
    resources: Arc<Mutex<CallResources>>,
}

pub(crate) struct ControllerInner {
    pub(crate) config: CallConfig,
    pub(crate) deps: CallDependencies,
    events: broadcast::Sender<CallEvent>,
    state: watch::Sender<CallState>,
    active: Mutex<Option<ActiveCall>>,
    device_override: Mutex<Option<DeviceState>>,
}

impl ControllerInner {
    pub(crate) fn emit(&self, event: CallEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn set_state(&self, call_id: &CallId, next: CallState) {
        let previous = self.state.send_replace(next);
        if previous == next {
            return;
        }
        info!(call_id = %call_id, from = %previous, to = %next, "Call state changed");
        self.emit(CallEvent::StateChanged {
            call_id: call_id.clone(),
            previous,
            current: next,
            at: Utc::now(),
        });
    }

    pub(crate) fn device_state(&self) -> DeviceState {
        self.device_override
            .lock()
            .clone()
            .unwrap_or_else(|| self.deps.media.device_state())
    }

    fn take_active(&self, session_id: Option<Uuid>) -> Option<ActiveCall> {
        let mut active = self.active.lock();
        match (active.as_ref(), session_id) {
            (Some(call), Some(id)) if call.session_id != id => None,
            (Some(_), _) => active.take(),
            (None, _) => None,
        }
    }

    /// Called by the driver task when its call ends on its own
    async fn on_driver_exit(&self, session_id: Uuid, exit: DriverExit) -> Option<CallError> {
        let (reason, error) = match exit {
            DriverExit::Cancelled => return None,
            DriverExit::Ended(reason) => (reason, None),
            DriverExit::Failed(error) => (CallEndReason::Failed, Some(error)),
        };
        let Some(active) = self.take_active(Some(session_id)) else {
            debug!(session = %session_id, "Call already torn down");
            return error;
        };
        self.teardown(active, reason, error.clone(), false).await;
        error
    }

    /// Release everything a call holds, in a fixed order
    async fn teardown(&self, mut active: ActiveCall, reason: CallEndReason, error: Option<CallError>, abort_driver: bool) {
        let call_id = active.call_id.clone();
        info!(call_id = %call_id, reason = %reason, "Tearing down call");

        active.token.cancel();
        if abort_driver {
            if let Some(driver) = active.driver.take() {
                driver.abort();
            }
        }

        let (transport, peer, local_stream, remote_attached, role, started_at, connected_at, last_rating) = {
            let mut resources = active.resources.lock();
            (
                resources.transport.take(),
                resources.peer.take(),
                resources.local_stream.take(),
                std::mem::take(&mut resources.remote_attached),
                resources.role,
                resources.started_at,
                resources.connected_at,
                resources.last_rating,
            )
        };

        if reason == CallEndReason::LocalHangup {
            if let Some(transport) = &transport {
                transport.send_best_effort(&SignalMessage::hangup(call_id.clone())).await;
            }
        }

        if let Some(peer) = &peer {
            if let Err(e) = peer.close().await {
                warn!(call_id = %call_id, error = %e, "Peer connection close failed");
            }
        }
        if let Some(transport) = &transport {
            if let Err(e) = transport.close().await {
                warn!(call_id = %call_id, error = %e, "Signal transport close failed");
            }
        }

        if let Some(stream) = &local_stream {
            stream.stop();
        }
        if remote_attached {
            self.deps.render.detach_remote_stream().await;
        }

        if let Some(call_log) = &self.deps.call_log {
            let ended_at = Utc::now();
            let record = CallRecord {
                call_id: call_id.clone(),
                role,
                started_at,
                connected_at,
                ended_at,
                duration_secs: connected_at.map(|at| (ended_at - at).num_seconds().max(0)).unwrap_or(0),
                end_reason: reason,
                last_rating,
            };
            if let Err(e) = call_log.record(record).await {
                warn!(call_id = %call_id, error = %e, "Failed to write call log record");
            }
        }

        let final_state = if error.is_some() {
            CallState::Failed
        } else {
            CallState::Ended
        };
        self.set_state(&call_id, final_state);
        if let Some(error) = error {
            self.emit(CallEvent::CallFailed {
                call_id: call_id.clone(),
                error,
            });
        }
        self.emit(CallEvent::CallEnded { call_id, reason });
    }
}

/// Drives one call at a time
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(config: CallConfig, deps: CallDependencies) -> CallResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let (state, _) = watch::channel(CallState::Idle);
        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                deps,
                events,
                state,
                active: Mutex::new(None),
                device_override: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &CallConfig {
        &self.inner.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> CallState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Place a call as the caller
    ///
    /// Returns once local media is acquired and the offer is sent. Media
    /// errors (`PermissionDenied`, `DeviceNotFound`, `DeviceBusy`) are
    /// returned here and the call never reaches negotiation.
    pub async fn start_call(&self, call_id: CallId) -> CallResult<()> {
        self.begin(call_id, Role::Caller).await
    }

    /// Join a call as the callee; negotiation starts when the offer arrives
    pub async fn accept_call(&self, call_id: CallId) -> CallResult<()> {
        self.begin(call_id, Role::Callee).await
    }

    async fn begin(&self, call_id: CallId, role: Role) -> CallResult<()> {
        let session_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let resources = Arc::new(Mutex::new(CallResources::new(role)));

        {
            let mut active = self.inner.active.lock();
            if let Some(existing) = active.as_ref() {
                return Err(CallError::CallAlreadyActive {
                    call_id: existing.call_id.to_string(),
                });
            }
            *active = Some(ActiveCall {
                session_id,
                call_id: call_id.clone(),
                token: token.clone(),
                driver: None,
                commands: commands_tx,
                resources: resources.clone(),
            });
        }
        info!(call_id = %call_id, role = %role, session = %session_id, "Starting call");

        let driver = CallDriver::new(
            self.inner.clone(),
            call_id.clone(),
            role,
            token,
            commands_rx,
            resources,
        );
        let (ready_tx, ready_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            let exit = driver.run(&mut ready).await;
            let error = inner.on_driver_exit(session_id, exit).await;
            if let Some(ready) = ready.take() {
                let _ = ready.send(Err(error.unwrap_or(CallError::NoActiveCall)));
            }
        });

        {
            let mut active = self.inner.active.lock();
            match active.as_mut() {
                Some(call) if call.session_id == session_id => call.driver = Some(handle),
                // Already finished or torn down
                _ => drop(handle),
            }
        }

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(CallError::invalid_state("negotiating", "ended during setup")),
        }
    }

    /// End the call and tell the remote side
    pub async fn hangup(&self) -> CallResult<()> {
        self.finish(CallEndReason::LocalHangup).await
    }

    /// End the call locally without signaling the remote side
    pub async fn end_session(&self) -> CallResult<()> {
        self.finish(CallEndReason::SessionEnded).await
    }

    async fn finish(&self, reason: CallEndReason) -> CallResult<()> {
        let active = self.inner.take_active(None).ok_or(CallError::NoActiveCall)?;
        self.inner.teardown(active, reason, None, true).await;
        Ok(())
    }

    /// New offer/answer cycle with the current media
    pub async fn renegotiate(&self) -> CallResult<()> {
        self.request_renegotiation(false).await
    }

    /// New offer with fresh ICE credentials
    pub async fn restart_ice(&self) -> CallResult<()> {
        self.request_renegotiation(true).await
    }

    async fn request_renegotiation(&self, ice_restart: bool) -> CallResult<()> {
        let commands = self.commands()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(DriverCommand::Renegotiate {
                ice_restart,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::NoActiveCall)?;
        reply_rx.await.map_err(|_| CallError::NoActiveCall)?
    }

    /// Device state used to cap the video profile from the next tick on
    pub async fn update_device_state(&self, device: DeviceState) -> CallResult<()> {
        *self.inner.device_override.lock() = Some(device.clone());
        let Ok(commands) = self.commands() else {
            return Ok(());
        };
        if commands.send(DriverCommand::UpdateDevice(device)).await.is_err() {
            debug!("Call ended before the device update was delivered");
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        let active = self.inner.active.lock();
        let call = active.as_ref()?;
        let resources = call.resources.lock();
        let negotiation = resources.negotiation.clone();
        Some(CallSnapshot {
            call_id: call.call_id.clone(),
            role: resources.role,
            state: self.state(),
            negotiation_state: negotiation.as_ref().map(|n| n.state),
            local_description_set: negotiation.as_ref().is_some_and(|n| n.local_description_set),
            remote_description_set: negotiation.as_ref().is_some_and(|n| n.remote_description_set),
            pending_candidates: negotiation.as_ref().map(|n| n.pending_candidates).unwrap_or(0),
            applied_candidates: negotiation.as_ref().map(|n| n.applied_candidates).unwrap_or(0),
            bitrate_bps: resources.bitrate_bps,
            profile: resources.profile,
            last_rating: resources.last_rating,
            reconnect_attempts: resources.reconnect_attempts,
            started_at: resources.started_at,
            connected_at: resources.connected_at,
        })
    }

    fn commands(&self) -> CallResult<mpsc::Sender<DriverCommand>> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|call| call.commands.clone())
            .ok_or(CallError::NoActiveCall)
    }
}
