//! Capture device seam: camera enumeration and capturer construction.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::{CaptureFormat, VideoSink};

/// Opaque capture grant handed over by the host once the user allowed
/// screen capture.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureToken(Arc<str>);

impl CaptureToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CaptureToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CaptureToken(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub name: String,
    pub front_facing: bool,
}

/// A running or startable source of raw video frames.
pub trait VideoCapturer: Send {
    fn is_screencast(&self) -> bool;

    /// Starts delivering frames of `format` into `sink`.
    fn start(&mut self, format: CaptureFormat, sink: Arc<dyn VideoSink>) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn dispose(&mut self);
}

/// Platform capture subsystem.
pub trait DeviceSubsystem: Send + Sync {
    fn enumerate_cameras(&self) -> Result<Vec<CameraDevice>>;

    fn create_camera_capturer(&self, device: &CameraDevice) -> Option<Box<dyn VideoCapturer>>;

    fn create_screen_capturer(&self, token: &CaptureToken) -> Option<Box<dyn VideoCapturer>>;
}

/// Picks a camera capturer, preferring front facing devices.
///
/// Returns `None` when no device yields a capturer.
pub fn create_camera_capturer(devices: &dyn DeviceSubsystem) -> Option<Box<dyn VideoCapturer>> {
    let cameras = match devices.enumerate_cameras() {
        Ok(cameras) => cameras,
        Err(e) => {
            warn!("Camera enumeration failed: {e:#}");
            return None;
        }
    };

    debug!("Looking for front facing cameras among {}", cameras.len());
    let front = cameras.iter().filter(|c| c.front_facing);
    let others = cameras.iter().filter(|c| !c.front_facing);
    for device in front.chain(others) {
        debug!(
            "Creating capturer for {} (front facing: {})",
            device.name, device.front_facing
        );
        if let Some(capturer) = devices.create_camera_capturer(device) {
            return Some(capturer);
        }
    }
    None
}
