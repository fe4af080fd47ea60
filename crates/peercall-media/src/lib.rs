#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod capture;
pub mod render;

mod dummy;

pub use capture::{
    create_camera_capturer, CameraDevice, CaptureToken, DeviceSubsystem, VideoCapturer,
};
pub use dummy::{CaptureStats, DummyCapturer, DummyDevices, DummyRenderContext, HeadlessSurface};
pub use render::{
    ProxyVideoSink, RenderContext, RenderSurface, ScalingType, SurfaceSink, VideoSink,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// The two video flows an endpoint sends and receives.
///
/// The track id doubles as the routing key on the receiving side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VideoFeed {
    Camera,
    Screen,
}

impl VideoFeed {
    pub const fn track_id(&self) -> &'static str {
        match self {
            VideoFeed::Camera => "camera",
            VideoFeed::Screen => "screen",
        }
    }

    pub fn from_track_id(id: &str) -> Option<Self> {
        if id.eq_ignore_ascii_case("camera") {
            Some(VideoFeed::Camera)
        } else if id.eq_ignore_ascii_case("screen") {
            Some(VideoFeed::Screen)
        } else {
            None
        }
    }
}

impl fmt::Display for VideoFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.track_id())
    }
}

/// Identity of a local track as attached to the connectivity engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureFormat {
    pub resolution: Resolution,
    pub fps: u16,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            resolution: Resolution {
                width: 1280,
                height: 720,
            },
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u16,
    pub height: u16,
    pub timestamp_us: u64,
    pub data: Vec<u8>,
}

/// Local microphone source and its track.
pub trait AudioSource: Send {
    fn track(&self) -> &LocalTrack;
    fn dispose(&mut self);
}

/// Video source fed by a capturer, plus the track published from it.
pub trait VideoSource: Send {
    fn track(&self) -> &LocalTrack;

    /// Sink the capturer delivers raw frames into.
    fn capture_sink(&self) -> Arc<dyn VideoSink>;

    /// Additional local consumer of captured frames (preview).
    fn add_sink(&mut self, sink: Arc<dyn VideoSink>);

    /// Releases the source and its capture helper.
    fn dispose(&mut self);
}

/// Remote video track announced by the connectivity engine.
pub trait RemoteVideoTrack: Send {
    fn id(&self) -> &str;
    fn add_sink(&mut self, sink: Arc<dyn VideoSink>);
}
