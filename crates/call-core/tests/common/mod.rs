//! Scripted collaborators for driving calls end to end
//!
//! Both ends of a call run real `SessionController`s over an
//! `InMemoryRelay`; only the peer connection, capture, and rendering are
//! scripted here.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_call_core::{
    CallConfig, CallDependencies, CallError, CallEvent, CallLog, CallRecord, CallResult, CallState,
    ConnectionState, EncodingParameters, MediaConstraints, MediaSource, MediaStream, PeerConfiguration,
    PeerConnection, PeerConnectionFactory, PeerEvent, RenderSink, SessionController,
};
use peercall_quality_core::{DeviceState, MediaCounters, StatsSnapshot};
use peercall_signal_core::{IceCandidate, InMemoryRelay, SdpType, SessionDescription};
use tokio::sync::{broadcast, mpsc};

static NEXT_SDP_SESSION: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug)]
pub struct MockStream {
    id: String,
    video: bool,
    stopped: AtomicBool,
}

impl MockStream {
    pub fn new(id: impl Into<String>, video: bool) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            video,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MediaStream for MockStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_audio(&self) -> bool {
        true
    }

    fn has_video(&self) -> bool {
        self.video
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockMedia {
    deny: Mutex<Option<CallError>>,
    streams: Mutex<Vec<Arc<MockStream>>>,
    device: Mutex<DeviceState>,
}

impl MockMedia {
    pub fn deny_with(&self, error: CallError) {
        *self.deny.lock() = Some(error);
    }

    pub fn streams(&self) -> Vec<Arc<MockStream>> {
        self.streams.lock().clone()
    }

    pub fn set_device(&self, device: DeviceState) {
        *self.device.lock() = device;
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn acquire_local_media(&self, constraints: &MediaConstraints) -> CallResult<Arc<dyn MediaStream>> {
        if let Some(error) = self.deny.lock().clone() {
            return Err(error);
        }
        let mut streams = self.streams.lock();
        let stream = MockStream::new(format!("local-{}", streams.len() + 1), constraints.video.is_some());
        streams.push(stream.clone());
        Ok(stream)
    }

    fn device_state(&self) -> DeviceState {
        self.device.lock().clone()
    }
}

#[derive(Default)]
pub struct MockRender {
    attached: Mutex<Vec<String>>,
    detached: AtomicUsize,
}

impl MockRender {
    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().clone()
    }

    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderSink for MockRender {
    async fn attach_remote_stream(&self, stream: Arc<dyn MediaStream>) -> CallResult<()> {
        self.attached.lock().push(stream.id().to_string());
        Ok(())
    }

    async fn detach_remote_stream(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockCallLog {
    records: Mutex<Vec<CallRecord>>,
}

impl MockCallLog {
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl CallLog for MockCallLog {
    async fn record(&self, record: CallRecord) -> CallResult<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// How a scripted peer behaves
#[derive(Debug, Clone)]
pub struct PeerScript {
    /// Report `Connected` once both descriptions are set
    pub auto_connect: bool,
    /// Local candidates emitted after the first local description
    pub local_candidates: usize,
    pub reject_remote_description: bool,
    pub reject_candidates: bool,
}

impl Default for PeerScript {
    fn default() -> Self {
        Self {
            auto_connect: true,
            local_candidates: 2,
            reject_remote_description: false,
            reject_candidates: false,
        }
    }
}

/// Network the scripted stats report
#[derive(Debug, Clone, Copy)]
pub struct LinkConditions {
    pub video_kbps: f64,
    pub audio_kbps: f64,
    pub loss_pct: f64,
    pub rtt_ms: f64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            video_kbps: 1500.0,
            audio_kbps: 64.0,
            loss_pct: 0.05,
            rtt_ms: 40.0,
        }
    }
}

#[derive(Default)]
struct PeerRecord {
    offers_created: usize,
    answers_created: usize,
    local: Vec<SessionDescription>,
    remote: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    encodings: Vec<EncodingParameters>,
    local_streams: Vec<String>,
    has_local: bool,
    has_remote: bool,
    gathered: bool,
    connected: bool,
    stats_at: Option<std::time::Instant>,
    bytes_video: f64,
    bytes_audio: f64,
    packets_lost: f64,
    packets_received: f64,
}

pub struct MockPeer {
    pub index: usize,
    script: PeerScript,
    events: mpsc::Sender<PeerEvent>,
    record: Mutex<PeerRecord>,
    link: Mutex<LinkConditions>,
    stats_calls: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeer").field("index", &self.index).finish()
    }
}

impl MockPeer {
    /// Inject a peer callback
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.try_send(event);
    }

    pub fn set_link(&self, link: LinkConditions) {
        *self.link.lock() = link;
    }

    pub fn offers_created(&self) -> usize {
        self.record.lock().offers_created
    }

    pub fn answers_created(&self) -> usize {
        self.record.lock().answers_created
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.record.lock().local.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.record.lock().remote.clone()
    }

    /// Remote candidates in the order they were applied
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.record.lock().candidates.clone()
    }

    pub fn encodings(&self) -> Vec<EncodingParameters> {
        self.record.lock().encodings.clone()
    }

    pub fn local_streams(&self) -> Vec<String> {
        self.record.lock().local_streams.clone()
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn sdp(&self, kind: &str) -> String {
        let session = NEXT_SDP_SESSION.fetch_add(1, Ordering::SeqCst);
        format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0 111\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:111 opus/48000/2\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\n",
            session, kind
        )
    }

    fn after_description(&self, record: &mut PeerRecord) {
        if record.has_local && !record.gathered {
            record.gathered = true;
            for n in 0..self.script.local_candidates {
                self.emit(PeerEvent::LocalCandidate(IceCandidate::new(
                    format!(
                        "candidate:{} 1 udp 2122260223 192.168.{}.{} 5000{} typ host",
                        n + 1,
                        self.index,
                        n + 10,
                        n
                    ),
                    Some("0".to_string()),
                    Some(0),
                )));
            }
            self.emit(PeerEvent::GatheringComplete);
        }
        if self.script.auto_connect && record.has_local && record.has_remote && !record.connected {
            record.connected = true;
            self.emit(PeerEvent::ConnectionStateChanged(ConnectionState::Checking));
            self.emit(PeerEvent::ConnectionStateChanged(ConnectionState::Connected));
            self.emit(PeerEvent::RemoteStream(MockStream::new(format!("remote-{}", self.index), true)));
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn create_offer(&self, _ice_restart: bool) -> CallResult<SessionDescription> {
        self.record.lock().offers_created += 1;
        Ok(SessionDescription::offer(self.sdp("offer")))
    }

    async fn create_answer(&self) -> CallResult<SessionDescription> {
        self.record.lock().answers_created += 1;
        Ok(SessionDescription::answer(self.sdp("answer")))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> CallResult<()> {
        let mut record = self.record.lock();
        record.local.push(description.clone());
        record.has_local = description.sdp_type != SdpType::Rollback;
        self.after_description(&mut record);
        Ok(())
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> CallResult<()> {
        if self.script.reject_remote_description {
            return Err(CallError::peer("set_remote_description", "malformed SDP"));
        }
        let mut record = self.record.lock();
        record.remote.push(description.clone());
        record.has_remote = true;
        self.after_description(&mut record);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> CallResult<()> {
        if self.script.reject_candidates {
            return Err(CallError::peer("add_ice_candidate", "candidate rejected"));
        }
        self.record.lock().candidates.push(candidate.clone());
        Ok(())
    }

    async fn add_local_stream(&self, stream: Arc<dyn MediaStream>) -> CallResult<()> {
        self.record.lock().local_streams.push(stream.id().to_string());
        Ok(())
    }

    async fn stats(&self) -> CallResult<StatsSnapshot> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let now = tokio::time::Instant::now().into_std();
        let link = *self.link.lock();
        let mut record = self.record.lock();
        let elapsed = record
            .stats_at
            .map(|at| now.saturating_duration_since(at).as_secs_f64())
            .unwrap_or(0.0);
        record.stats_at = Some(now);
        record.bytes_video += link.video_kbps * 1000.0 / 8.0 * elapsed;
        record.bytes_audio += link.audio_kbps * 1000.0 / 8.0 * elapsed;
        let packets = 100.0 * elapsed;
        record.packets_lost += packets * link.loss_pct / 100.0;
        record.packets_received += packets * (1.0 - link.loss_pct / 100.0);

        Ok(StatsSnapshot {
            captured_at: now,
            audio: Some(MediaCounters {
                bytes_sent: record.bytes_audio as u64,
                bytes_received: record.bytes_audio as u64,
            }),
            video: Some(MediaCounters {
                bytes_sent: record.bytes_video as u64,
                bytes_received: record.bytes_video as u64,
            }),
            packets_lost: record.packets_lost.round() as u64,
            packets_received: record.packets_received.round() as u64,
            jitter_ms: 4.0,
            round_trip_time_ms: link.rtt_ms,
        })
    }

    async fn set_encoding(&self, parameters: &EncodingParameters) -> CallResult<()> {
        self.record.lock().encodings.push(*parameters);
        Ok(())
    }

    async fn close(&self) -> CallResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPeerFactory {
    script: Mutex<PeerScript>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn with_script(script: PeerScript) -> Self {
        Self {
            script: Mutex::new(script),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Script for peers created from now on
    pub fn set_script(&self, script: PeerScript) {
        *self.script.lock() = script;
    }

    pub fn peer(&self, index: usize) -> Arc<MockPeer> {
        self.peers.lock()[index].clone()
    }

    pub fn latest(&self) -> Arc<MockPeer> {
        self.peers.lock().last().cloned().expect("no peer created yet")
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(
        &self,
        _config: &PeerConfiguration,
    ) -> CallResult<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerEvent>)> {
        let (events, receiver) = mpsc::channel(64);
        let mut peers = self.peers.lock();
        let peer = Arc::new(MockPeer {
            index: peers.len(),
            script: self.script.lock().clone(),
            events,
            record: Mutex::new(PeerRecord::default()),
            link: Mutex::new(LinkConditions::default()),
            stats_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        peers.push(peer.clone());
        Ok((peer as Arc<dyn PeerConnection>, receiver))
    }
}

/// One endpoint: a controller plus its scripted collaborators
pub struct Endpoint {
    pub controller: SessionController,
    pub peers: Arc<MockPeerFactory>,
    pub media: Arc<MockMedia>,
    pub render: Arc<MockRender>,
    pub call_log: Arc<MockCallLog>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl Endpoint {
    pub fn new(relay: &InMemoryRelay, config: CallConfig) -> Self {
        Self::with_peers(relay, config, MockPeerFactory::default())
    }

    pub fn with_peers(relay: &InMemoryRelay, config: CallConfig, peers: MockPeerFactory) -> Self {
        let peers = Arc::new(peers);
        let media = Arc::new(MockMedia::default());
        let render = Arc::new(MockRender::default());
        let call_log = Arc::new(MockCallLog::default());
        let deps = CallDependencies::new(Arc::new(relay.clone()), peers.clone(), media.clone(), render.clone())
            .with_call_log(call_log.clone());
        let controller = SessionController::new(config, deps).expect("valid config");
        let events = controller.subscribe_events();
        Self {
            controller,
            peers,
            media,
            render,
            call_log,
            events,
        }
    }

    /// Drain the events received so far
    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub async fn wait_for_state(controller: &SessionController, target: CallState) {
    let mut states = controller.watch_state();
    tokio::time::timeout(Duration::from_secs(120), states.wait_for(|state| *state == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}"))
        .expect("state channel closed");
}

/// Let the paused clock run forward, firing every timer on the way
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
