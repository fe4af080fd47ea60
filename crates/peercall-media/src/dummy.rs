use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::capture::{CameraDevice, CaptureToken, DeviceSubsystem, VideoCapturer};
use crate::render::{RenderContext, RenderSurface, VideoSink};
use crate::{CaptureFormat, VideoFrame};

/// Lifecycle counts shared by the capturers of one [`DummyDevices`].
#[derive(Debug, Default)]
pub struct CaptureStats {
    created: AtomicUsize,
    running: AtomicUsize,
    disposed: AtomicUsize,
}

impl CaptureStats {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Capturers started and not yet stopped.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Capturer producing blank frames at the requested rate on its own thread.
pub struct DummyCapturer {
    screencast: bool,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<CaptureStats>,
    disposed: bool,
}

impl DummyCapturer {
    pub fn new(screencast: bool) -> Self {
        Self::with_stats(screencast, Arc::default())
    }

    pub fn with_stats(screencast: bool, stats: Arc<CaptureStats>) -> Self {
        stats.created.fetch_add(1, Ordering::SeqCst);
        Self {
            screencast,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            stats,
            disposed: false,
        }
    }
}

impl VideoCapturer for DummyCapturer {
    fn is_screencast(&self) -> bool {
        self.screencast
    }

    fn start(&mut self, format: CaptureFormat, sink: Arc<dyn VideoSink>) -> Result<()> {
        if self.worker.is_some() {
            return Err(anyhow!("capturer already started"));
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let frame_interval = Duration::from_secs_f64(1.0 / format.fps.max(1) as f64);
        let worker = std::thread::Builder::new()
            .name("dummy-capture".into())
            .spawn(move || {
                let start = Instant::now();
                let bytes = format.resolution.width as usize * format.resolution.height as usize;
                while running.load(Ordering::SeqCst) {
                    sink.on_frame(&VideoFrame {
                        width: format.resolution.width,
                        height: format.resolution.height,
                        timestamp_us: start.elapsed().as_micros() as u64,
                        data: vec![0x10; bytes],
                    });
                    std::thread::sleep(frame_interval);
                }
            })?;
        self.worker = Some(worker);
        self.stats.running.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            self.stats.running.fetch_sub(1, Ordering::SeqCst);
            worker
                .join()
                .map_err(|_| anyhow!("dummy capture thread panicked"))?;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!("Dummy capturer stop during dispose failed: {e:#}");
            }
        }
        if !std::mem::replace(&mut self.disposed, true) {
            self.stats.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Device subsystem with a fixed camera list and an always-available screen.
pub struct DummyDevices {
    cameras: Vec<CameraDevice>,
    broken: Vec<String>,
    screen_available: bool,
    attempted: Mutex<Vec<String>>,
    stats: Arc<CaptureStats>,
}

impl DummyDevices {
    pub fn new(cameras: Vec<CameraDevice>) -> Self {
        Self {
            cameras,
            broken: Vec::new(),
            screen_available: true,
            attempted: Mutex::new(Vec::new()),
            stats: Arc::default(),
        }
    }

    /// A single front facing camera and a capturable screen.
    pub fn standard() -> Self {
        Self::new(vec![CameraDevice {
            name: "dummy-front".into(),
            front_facing: true,
        }])
    }

    pub fn with_broken_camera(mut self, name: &str) -> Self {
        self.broken.push(name.to_string());
        self
    }

    pub fn without_screen(mut self) -> Self {
        self.screen_available = false;
        self
    }

    pub fn attempted_cameras(&self) -> Vec<String> {
        self.attempted.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn capture_stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }
}

impl DeviceSubsystem for DummyDevices {
    fn enumerate_cameras(&self) -> Result<Vec<CameraDevice>> {
        Ok(self.cameras.clone())
    }

    fn create_camera_capturer(&self, device: &CameraDevice) -> Option<Box<dyn VideoCapturer>> {
        if let Ok(mut attempted) = self.attempted.lock() {
            attempted.push(device.name.clone());
        }
        if self.broken.contains(&device.name) {
            return None;
        }
        Some(Box::new(DummyCapturer::with_stats(false, self.stats.clone())))
    }

    fn create_screen_capturer(&self, _token: &CaptureToken) -> Option<Box<dyn VideoCapturer>> {
        self.screen_available
            .then(|| Box::new(DummyCapturer::with_stats(true, self.stats.clone())) as Box<dyn VideoCapturer>)
    }
}

#[derive(Debug, Default)]
pub struct DummyRenderContext {
    released: bool,
}

impl DummyRenderContext {
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl RenderContext for DummyRenderContext {
    fn release(&mut self) {
        self.released = true;
    }
}

/// Surface that only counts the frames it would have drawn.
pub struct HeadlessSurface {
    name: String,
    frames: AtomicU64,
    initialized: AtomicBool,
}

impl HeadlessSurface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

impl VideoSink for HeadlessSurface {
    fn on_frame(&self, _frame: &VideoFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

impl RenderSurface for HeadlessSurface {
    fn init(&self, _context: &dyn RenderContext) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        if self.initialized.swap(false, Ordering::SeqCst) {
            debug!(
                "Released surface {} after {} frames",
                self.name,
                self.frames_rendered()
            );
        }
    }
}
