use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::VideoFrame;

/// Consumer of decoded or captured video frames. Called from media threads.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingType {
    AspectFit,
    AspectFill,
}

/// Rendering base context shared by the surfaces of one session.
pub trait RenderContext: Send {
    fn release(&mut self);
}

/// On-screen surface a video flow is drawn into.
pub trait RenderSurface: VideoSink {
    fn init(&self, context: &dyn RenderContext) -> Result<()>;

    fn release(&self);

    fn set_mirror(&self, _mirror: bool) {}

    fn set_scaling(&self, _scaling: ScalingType) {}
}

/// Presents a surface as a plain frame consumer.
pub struct SurfaceSink(pub Arc<dyn RenderSurface>);

impl VideoSink for SurfaceSink {
    fn on_frame(&self, frame: &VideoFrame) {
        self.0.on_frame(frame);
    }
}

/// Indirection between a track and a surface.
///
/// Tracks hold on to the proxy, so detaching the target is enough to make
/// frames arriving after teardown disappear.
#[derive(Default)]
pub struct ProxyVideoSink {
    target: Mutex<Option<Arc<dyn VideoSink>>>,
}

impl ProxyVideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&self, target: Option<Arc<dyn VideoSink>>) {
        if let Ok(mut guard) = self.target.lock() {
            *guard = target;
        }
    }

    pub fn has_target(&self) -> bool {
        self.target.lock().map(|t| t.is_some()).unwrap_or(false)
    }
}

impl VideoSink for ProxyVideoSink {
    fn on_frame(&self, frame: &VideoFrame) {
        let target = match self.target.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        if let Some(target) = target {
            target.on_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl VideoSink for CountingSink {
        fn on_frame(&self, _frame: &VideoFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame() -> VideoFrame {
        VideoFrame {
            width: 2,
            height: 2,
            timestamp_us: 0,
            data: vec![0; 4],
        }
    }

    #[test]
    fn test_proxy_forwards_until_detached() {
        let sink = Arc::new(CountingSink::default());
        let proxy = ProxyVideoSink::new();
        proxy.on_frame(&frame());

        proxy.set_target(Some(sink.clone()));
        assert!(proxy.has_target());
        proxy.on_frame(&frame());
        proxy.on_frame(&frame());

        proxy.set_target(None);
        proxy.on_frame(&frame());
        assert!(!proxy.has_target());
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }
}
