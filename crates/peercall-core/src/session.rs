//! Per-call media resources and their ordered construction and teardown.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use peercall_common::{Error, Result};
use peercall_media::{
    create_camera_capturer, AudioSource, CaptureToken, DeviceSubsystem, ProxyVideoSink,
    RemoteVideoTrack, RenderContext, RenderSurface, ScalingType, SurfaceSink, VideoCapturer,
    VideoFeed, VideoSink, VideoSource,
};

use crate::config::CallConfig;
use crate::engine::{
    ConnectivityEngine, DataChannel, DataChannelInit, EngineEvents, MediaBackend, MediaFactory,
};

/// Host-owned surfaces the three video flows are drawn into.
#[derive(Clone)]
pub struct Surfaces {
    pub local: Arc<dyn RenderSurface>,
    pub remote_camera: Arc<dyn RenderSurface>,
    pub remote_screen: Arc<dyn RenderSurface>,
}

/// Proxies that outlive sessions. Tracks only ever see these, never a
/// surface directly.
#[derive(Clone, Default)]
pub(crate) struct Sinks {
    pub local: Arc<ProxyVideoSink>,
    pub remote_camera: Arc<ProxyVideoSink>,
    pub remote_screen: Arc<ProxyVideoSink>,
}

impl Sinks {
    fn remote(&self, feed: VideoFeed) -> Arc<ProxyVideoSink> {
        match feed {
            VideoFeed::Camera => self.remote_camera.clone(),
            VideoFeed::Screen => self.remote_screen.clone(),
        }
    }

    fn detach_all(&self) {
        self.local.set_target(None);
        self.remote_camera.set_target(None);
        self.remote_screen.set_target(None);
    }
}

/// Everything a session is built from, shared by every call attempt.
pub(crate) struct SessionContext {
    pub config: CallConfig,
    pub backend: Arc<dyn MediaBackend>,
    pub devices: Arc<dyn DeviceSubsystem>,
    pub surfaces: Surfaces,
    pub sinks: Sinks,
}

struct VideoBundle {
    feed: VideoFeed,
    capturer: Box<dyn VideoCapturer>,
    source: Box<dyn VideoSource>,
}

impl VideoBundle {
    fn dispose(mut self) {
        if let Err(e) = self.capturer.stop() {
            error!("Failed to stop {} capturer: {e:#}", self.feed);
        }
        self.capturer.dispose();
        self.source.dispose();
    }
}

/// Media resources of one call attempt.
///
/// Fields fill in during [`MediaSession::open`]; a session that failed half
/// way is closed through the same path as a complete one.
pub struct MediaSession {
    factory: Box<dyn MediaFactory>,
    render: Option<Box<dyn RenderContext>>,
    videos: Vec<VideoBundle>,
    audio: Option<Box<dyn AudioSource>>,
    engine: Option<Box<dyn ConnectivityEngine>>,
    data_channel: Option<Box<dyn DataChannel>>,
    closed: bool,
}

impl MediaSession {
    /// Acquires capture, audio and the engine. Video capture failures
    /// degrade the session; anything else releases what was acquired and
    /// fails the attempt.
    pub(crate) fn open(
        ctx: &SessionContext,
        token: Option<&CaptureToken>,
        events: EngineEvents,
    ) -> Result<Self> {
        let factory = ctx
            .backend
            .create_factory()
            .map_err(|e| Error::media(format!("media factory unavailable: {e:#}")))?;
        let mut session = Self {
            factory,
            render: None,
            videos: Vec::new(),
            audio: None,
            engine: None,
            data_channel: None,
            closed: false,
        };
        let generation = events.generation();
        match session.acquire(ctx, token, events) {
            Ok(()) => {
                info!(
                    "Media session {generation} ready (video: {:?})",
                    session.video_feeds()
                );
                Ok(session)
            }
            Err(e) => {
                session.close(ctx);
                Err(e)
            }
        }
    }

    fn acquire(
        &mut self,
        ctx: &SessionContext,
        token: Option<&CaptureToken>,
        events: EngineEvents,
    ) -> Result<()> {
        let render = self
            .factory
            .create_render_context()
            .map_err(|e| Error::media(format!("render context unavailable: {e:#}")))?;
        init_surface(&ctx.surfaces.local, render.as_ref(), "local");
        init_surface(&ctx.surfaces.remote_camera, render.as_ref(), "remote camera");
        init_surface(&ctx.surfaces.remote_screen, render.as_ref(), "remote screen");
        ctx.surfaces.local.set_mirror(true);
        ctx.surfaces.remote_screen.set_scaling(ScalingType::AspectFit);
        self.render = Some(render);

        let stream_id = ctx.config.stream_id.as_str();
        match token {
            Some(token) => {
                let capturer = ctx.devices.create_screen_capturer(token);
                self.add_video(ctx, VideoFeed::Screen, capturer);
            }
            None => debug!("No capture grant, skipping screen capture"),
        }
        let camera = create_camera_capturer(ctx.devices.as_ref());
        self.add_video(ctx, VideoFeed::Camera, camera);
        if self.videos.is_empty() {
            warn!("No video capture available, continuing with audio only");
        }

        let audio = self
            .factory
            .create_audio_source(&ctx.config.audio_track_id, stream_id)
            .map_err(|e| Error::media(format!("audio source unavailable: {e:#}")))?;
        self.audio = Some(audio);

        ctx.sinks.local.set_target(Some(surface_sink(&ctx.surfaces.local)));
        ctx.sinks
            .remote_camera
            .set_target(Some(surface_sink(&ctx.surfaces.remote_camera)));
        ctx.sinks
            .remote_screen
            .set_target(Some(surface_sink(&ctx.surfaces.remote_screen)));
        for video in &mut self.videos {
            if video.feed == VideoFeed::Camera {
                video.source.add_sink(ctx.sinks.local.clone());
            }
        }

        let mut engine = self
            .factory
            .create_engine(&ctx.config.rtc, events)
            .map_err(|e| Error::engine(format!("connectivity engine unavailable: {e:#}")))?;

        let mut tracks = Vec::with_capacity(3);
        tracks.extend(self.audio.as_ref().map(|a| a.track().clone()));
        tracks.extend(self.videos.iter().map(|v| v.source.track().clone()));
        for track in &tracks {
            if let Err(e) = engine.add_track(track) {
                warn!("Failed to attach track {}: {e:#}", track.id);
            }
        }
        self.engine = Some(engine);
        Ok(())
    }

    fn add_video(
        &mut self,
        ctx: &SessionContext,
        feed: VideoFeed,
        capturer: Option<Box<dyn VideoCapturer>>,
    ) {
        let Some(mut capturer) = capturer else {
            warn!("No {feed} capturer available");
            return;
        };
        let mut source = match self.factory.create_video_source(
            feed,
            &ctx.config.stream_id,
            capturer.is_screencast(),
        ) {
            Ok(source) => source,
            Err(e) => {
                warn!("Failed to create {feed} video source: {e:#}");
                capturer.dispose();
                return;
            }
        };
        if let Err(e) = capturer.start(ctx.config.capture, source.capture_sink()) {
            warn!("Failed to start {feed} capture: {e:#}");
            capturer.dispose();
            source.dispose();
            return;
        }
        debug!("Capturing {feed} video");
        self.videos.push(VideoBundle {
            feed,
            capturer,
            source,
        });
    }

    pub fn video_feeds(&self) -> Vec<VideoFeed> {
        self.videos.iter().map(|v| v.feed).collect()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub(crate) fn engine(&mut self) -> Option<&mut (dyn ConnectivityEngine + 'static)> {
        self.engine.as_deref_mut()
    }

    /// Opens the outgoing data channel on the caller side.
    pub(crate) fn open_data_channel(&mut self, label: &str) -> Result<()> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| Error::internal("data channel requested without an engine"))?;
        let channel = engine
            .create_data_channel(label, &DataChannelInit::default())
            .map_err(|e| Error::engine(format!("failed to open data channel {label}: {e:#}")))?;
        self.set_data_channel(channel);
        Ok(())
    }

    /// Adopts `channel`, disposing the one it replaces.
    pub(crate) fn set_data_channel(&mut self, channel: Box<dyn DataChannel>) {
        debug!("Using data channel {}", channel.label());
        if let Some(mut previous) = self.data_channel.replace(channel) {
            previous.dispose();
        }
    }

    /// Disposes the data channel, if any. The call continues without it.
    pub(crate) fn drop_data_channel(&mut self) {
        if let Some(mut channel) = self.data_channel.take() {
            debug!("Dropping data channel {}", channel.label());
            channel.dispose();
        }
    }

    pub fn has_data_channel(&self) -> bool {
        self.data_channel.is_some()
    }

    pub(crate) fn send_data(&self, text: &str) -> Result<()> {
        let channel = self
            .data_channel
            .as_ref()
            .ok_or_else(|| Error::transport("no data channel"))?;
        channel
            .send_text(text)
            .map_err(|e| Error::transport(format!("data channel send failed: {e:#}")))
    }

    /// Connects a remote video track to the sink matching its id.
    pub(crate) fn route_remote_track(&self, ctx: &SessionContext, mut track: Box<dyn RemoteVideoTrack>) {
        match VideoFeed::from_track_id(track.id()) {
            Some(feed) => {
                debug!("Routing remote {feed} track");
                track.add_sink(ctx.sinks.remote(feed));
            }
            None => debug!("Ignoring remote video track {}", track.id()),
        }
    }

    /// Releases every resource. Each step runs regardless of the others and
    /// a second call does nothing.
    pub(crate) fn close(&mut self, ctx: &SessionContext) {
        if self.closed {
            return;
        }
        self.closed = true;

        ctx.sinks.detach_all();
        ctx.surfaces.local.release();
        ctx.surfaces.remote_camera.release();
        ctx.surfaces.remote_screen.release();

        if let Some(mut channel) = self.data_channel.take() {
            channel.dispose();
        }
        if let Some(mut engine) = self.engine.take() {
            engine.close();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.dispose();
        }
        for video in self.videos.drain(..) {
            video.dispose();
        }
        self.factory.dispose();
        if let Some(mut render) = self.render.take() {
            render.release();
        }
        debug!("Media session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn init_surface(surface: &Arc<dyn RenderSurface>, context: &dyn RenderContext, name: &str) {
    if let Err(e) = surface.init(context) {
        warn!("Failed to initialise {name} surface: {e:#}");
    }
}

fn surface_sink(surface: &Arc<dyn RenderSurface>) -> Arc<dyn VideoSink> {
    Arc::new(SurfaceSink(surface.clone()))
}
