//! Scripted fakes for the media backend, engine and data channel.
//!
//! Engine operations complete by emitting straight into the negotiator's
//! event channel, so tests decide exactly when completions are processed by
//! pumping that channel.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use peercall_common::{IceCandidate, SignalingMessage};
use peercall_core::{
    CallConfig, CallDeps, CallSnapshot, ChannelTransport, ConnectivityEngine, DataChannel,
    DataChannelInit, EngineEvent, EngineEvents, EngineOp, Event, HostCommand, MediaBackend,
    MediaFactory, Negotiator, Notice, PermissionHandle, RtcConfig, SessionDescription,
    SignalingTransport, Surfaces,
};
use peercall_media::{
    AudioSource, CaptureFormat, CaptureStats, CaptureToken, DummyDevices, HeadlessSurface, LocalTrack, MediaKind,
    RemoteVideoTrack, RenderContext, Resolution, VideoFeed, VideoFrame, VideoSink, VideoSource,
};

/// Shared record of everything the fakes were asked to do.
#[derive(Default)]
pub struct FakeState {
    log: Mutex<Vec<String>>,
    failing: Mutex<Vec<EngineOp>>,
    pub fail_audio: AtomicBool,
    pub fail_data_channel: AtomicBool,
    pub factories_created: AtomicUsize,
    pub factories_disposed: AtomicUsize,
    pub engines_created: AtomicUsize,
    pub engines_closed: AtomicUsize,
    pub audio_disposed: AtomicUsize,
    pub video_sources_disposed: AtomicUsize,
    pub channels_disposed: AtomicUsize,
    pub render_released: AtomicUsize,
    data_sent: Mutex<Vec<String>>,
    events: Mutex<Option<EngineEvents>>,
}

impl FakeState {
    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Index of the first log entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    pub fn fail(&self, op: EngineOp) {
        self.failing.lock().unwrap().push(op);
    }

    fn fails(&self, op: EngineOp) -> bool {
        self.failing.lock().unwrap().contains(&op)
    }

    pub fn data_sent(&self) -> Vec<String> {
        self.data_sent.lock().unwrap().clone()
    }

    /// Event sink of the most recently created engine.
    pub fn events(&self) -> EngineEvents {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("no engine was created")
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    pub state: Arc<FakeState>,
}

impl MediaBackend for FakeBackend {
    fn create_factory(&self) -> Result<Box<dyn MediaFactory>> {
        self.state.factories_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeFactory {
            state: self.state.clone(),
        }))
    }
}

struct FakeFactory {
    state: Arc<FakeState>,
}

impl MediaFactory for FakeFactory {
    fn create_render_context(&mut self) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(FakeRenderContext {
            state: self.state.clone(),
        }))
    }

    fn create_audio_source(&mut self, track_id: &str, stream_id: &str) -> Result<Box<dyn AudioSource>> {
        if self.state.fail_audio.load(Ordering::SeqCst) {
            return Err(anyhow!("microphone unavailable"));
        }
        Ok(Box::new(FakeAudio {
            track: LocalTrack {
                id: track_id.to_string(),
                stream_id: stream_id.to_string(),
                kind: MediaKind::Audio,
            },
            state: self.state.clone(),
        }))
    }

    fn create_video_source(
        &mut self,
        feed: VideoFeed,
        stream_id: &str,
        _screencast: bool,
    ) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(FakeVideo {
            track: LocalTrack {
                id: feed.track_id().to_string(),
                stream_id: stream_id.to_string(),
                kind: MediaKind::Video,
            },
            sink: Arc::new(FrameCounter::default()),
            state: self.state.clone(),
        }))
    }

    fn create_engine(
        &mut self,
        _config: &RtcConfig,
        events: EngineEvents,
    ) -> Result<Box<dyn ConnectivityEngine>> {
        self.state.engines_created.fetch_add(1, Ordering::SeqCst);
        *self.state.events.lock().unwrap() = Some(events.clone());
        Ok(Box::new(FakeEngine {
            state: self.state.clone(),
            events,
        }))
    }

    fn dispose(&mut self) {
        self.state.factories_disposed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeRenderContext {
    state: Arc<FakeState>,
}

impl RenderContext for FakeRenderContext {
    fn release(&mut self) {
        self.state.render_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeAudio {
    track: LocalTrack,
    state: Arc<FakeState>,
}

impl AudioSource for FakeAudio {
    fn track(&self) -> &LocalTrack {
        &self.track
    }

    fn dispose(&mut self) {
        self.state.audio_disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FrameCounter(AtomicUsize);

impl FrameCounter {
    pub fn frames(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl VideoSink for FrameCounter {
    fn on_frame(&self, _frame: &VideoFrame) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeVideo {
    track: LocalTrack,
    sink: Arc<FrameCounter>,
    state: Arc<FakeState>,
}

impl VideoSource for FakeVideo {
    fn track(&self) -> &LocalTrack {
        &self.track
    }

    fn capture_sink(&self) -> Arc<dyn VideoSink> {
        self.sink.clone()
    }

    fn add_sink(&mut self, _sink: Arc<dyn VideoSink>) {
        self.state.record(format!("preview:{}", self.track.id));
    }

    fn dispose(&mut self) {
        self.state.video_sources_disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine that completes every request immediately unless told to fail.
struct FakeEngine {
    state: Arc<FakeState>,
    events: EngineEvents,
}

impl FakeEngine {
    fn complete(&self, op: EngineOp, event: EngineEvent) {
        if self.state.fails(op) {
            self.events.failed(op, "scripted failure");
        } else {
            self.events.emit(event);
        }
    }
}

impl ConnectivityEngine for FakeEngine {
    fn create_offer(&mut self) {
        self.state.record("create_offer");
        let sdp = format!("v=0 offer {}", self.events.generation());
        self.complete(EngineOp::CreateOffer, EngineEvent::OfferCreated(SessionDescription::offer(sdp)));
    }

    fn create_answer(&mut self) {
        self.state.record("create_answer");
        let sdp = format!("v=0 answer {}", self.events.generation());
        self.complete(EngineOp::CreateAnswer, EngineEvent::AnswerCreated(SessionDescription::answer(sdp)));
    }

    fn set_local_description(&mut self, description: SessionDescription) {
        self.state.record(format!("set_local:{}", description.sdp));
        self.complete(EngineOp::SetLocalDescription, EngineEvent::LocalDescriptionSet);
    }

    fn set_remote_description(&mut self, description: SessionDescription) {
        self.state.record(format!("set_remote:{}", description.sdp));
        self.complete(EngineOp::SetRemoteDescription, EngineEvent::RemoteDescriptionSet);
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) {
        self.state.record(format!("add_candidate:{}", candidate.candidate));
        if self.state.fails(EngineOp::AddIceCandidate) {
            self.events.failed(EngineOp::AddIceCandidate, "scripted failure");
        }
    }

    fn add_track(&mut self, track: &LocalTrack) -> Result<()> {
        self.state.record(format!("add_track:{}", track.id));
        Ok(())
    }

    fn create_data_channel(&mut self, label: &str, init: &DataChannelInit) -> Result<Box<dyn DataChannel>> {
        self.state.record(format!("create_data_channel:{label}:ordered={}", init.ordered));
        if self.state.fail_data_channel.load(Ordering::SeqCst) {
            return Err(anyhow!("sctp unavailable"));
        }
        Ok(Box::new(FakeChannel::new(label, self.state.clone())))
    }

    fn close(&mut self) {
        self.state.record("close");
        self.state.engines_closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeChannel {
    label: String,
    state: Arc<FakeState>,
}

impl FakeChannel {
    pub fn new(label: &str, state: Arc<FakeState>) -> Self {
        Self {
            label: label.to_string(),
            state,
        }
    }
}

impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.state.data_sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn dispose(&mut self) {
        self.state.channels_disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Remote track whose attached sinks stay reachable from the test.
pub struct FakeRemoteTrack {
    pub id: String,
    pub sinks: Arc<Mutex<Vec<Arc<dyn VideoSink>>>>,
}

impl RemoteVideoTrack for FakeRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_sink(&mut self, sink: Arc<dyn VideoSink>) {
        self.sinks.lock().unwrap().push(sink);
    }
}

pub fn frame() -> VideoFrame {
    VideoFrame {
        width: 2,
        height: 2,
        timestamp_us: 0,
        data: vec![0; 4],
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate::new("audio0", 0, format!("candidate:{n}"))
}

pub struct TestSurfaces {
    pub local: Arc<HeadlessSurface>,
    pub remote_camera: Arc<HeadlessSurface>,
    pub remote_screen: Arc<HeadlessSurface>,
}

impl TestSurfaces {
    fn new() -> Self {
        Self {
            local: Arc::new(HeadlessSurface::new("local")),
            remote_camera: Arc::new(HeadlessSurface::new("remote-camera")),
            remote_screen: Arc::new(HeadlessSurface::new("remote-screen")),
        }
    }

    fn surfaces(&self) -> Surfaces {
        Surfaces {
            local: self.local.clone(),
            remote_camera: self.remote_camera.clone(),
            remote_screen: self.remote_screen.clone(),
        }
    }

    pub fn any_initialized(&self) -> bool {
        self.local.is_initialized()
            || self.remote_camera.is_initialized()
            || self.remote_screen.is_initialized()
    }
}

/// Low-rate capture so dummy capture threads stay cheap.
pub fn test_config() -> CallConfig {
    CallConfig {
        capture: CaptureFormat {
            resolution: Resolution {
                width: 16,
                height: 16,
            },
            fps: 5,
        },
        ..CallConfig::default()
    }
}

/// A negotiator wired to fakes and driven synchronously.
pub struct Harness {
    pub negotiator: Negotiator,
    pub state: Arc<FakeState>,
    pub surfaces: TestSurfaces,
    pub capture: Arc<CaptureStats>,
    pub permission: PermissionHandle,
    events: mpsc::UnboundedReceiver<Event>,
    notices: mpsc::UnboundedReceiver<Notice>,
    outbound: Option<mpsc::UnboundedReceiver<SignalingMessage>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true, DummyDevices::standard())
    }

    pub fn without_transport() -> Self {
        Self::build(false, DummyDevices::standard())
    }

    pub fn with_devices(devices: DummyDevices) -> Self {
        Self::build(true, devices)
    }

    fn build(with_transport: bool, devices: DummyDevices) -> Self {
        let state = Arc::new(FakeState::default());
        let surfaces = TestSurfaces::new();
        let capture = devices.capture_stats();
        let (transport, outbound) = if with_transport {
            let (transport, rx) = ChannelTransport::new();
            (Some(Arc::new(transport) as Arc<dyn SignalingTransport>), Some(rx))
        } else {
            (None, None)
        };
        let deps = CallDeps {
            config: test_config(),
            backend: Arc::new(FakeBackend {
                state: state.clone(),
            }),
            devices: Arc::new(devices),
            surfaces: surfaces.surfaces(),
            transport,
        };
        let (tx, events) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let negotiator = Negotiator::new(deps, tx, notice_tx);
        let permission = negotiator.permission();
        Self {
            negotiator,
            state,
            surfaces,
            capture,
            permission,
            events,
            notices,
            outbound,
        }
    }

    /// Processes queued events, including completions they trigger.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events.try_recv() {
            self.negotiator.handle(event);
            processed += 1;
        }
        processed
    }

    pub fn grant(&mut self) {
        self.permission.grant(CaptureToken::new("projection"));
        self.pump();
    }

    /// Hands a signaling message to the negotiator without processing the
    /// completions it triggers.
    pub fn receive(&mut self, message: SignalingMessage) {
        self.negotiator.handle(Event::Signaling(message));
    }

    pub fn deliver(&mut self, message: SignalingMessage) {
        self.receive(message);
        self.pump();
    }

    pub fn host(&mut self, command: HostCommand) {
        self.negotiator.handle(Event::Host(command));
        self.pump();
    }

    pub fn emit(&mut self, event: EngineEvent) {
        self.state.events().emit(event);
        self.pump();
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.negotiator.snapshot()
    }

    pub fn sent(&mut self) -> Vec<SignalingMessage> {
        let mut sent = Vec::new();
        if let Some(outbound) = self.outbound.as_mut() {
            while let Ok(message) = outbound.try_recv() {
                sent.push(message);
            }
        }
        sent
    }

    pub fn notices(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            notices.push(notice);
        }
        notices
    }

    /// Starts a call as the answering side and runs negotiation to completion.
    pub fn answered_call(&mut self) {
        self.grant();
        self.deliver(SignalingMessage::offer("v=0 remote offer"));
    }
}
