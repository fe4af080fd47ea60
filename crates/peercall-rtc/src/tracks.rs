//! Local sample tracks fed from capturers, and remote RTP tracks fed to sinks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use peercall_media::{AudioSource, LocalTrack, RemoteVideoTrack, VideoFrame, VideoSink, VideoSource};

pub(crate) const VIDEO_CLOCK_RATE: u64 = 90_000;
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(33);
const SAMPLE_BACKLOG: usize = 8;
/// Largest frame reassembled from RTP before the partial frame is discarded.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Local tracks of one factory, looked up by id when attached to an engine.
#[derive(Clone, Default)]
pub(crate) struct TrackRegistry {
    tracks: Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>,
}

impl TrackRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<TrackLocalStaticSample>>> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: &str, track: Arc<TrackLocalStaticSample>) {
        self.lock().insert(id.to_string(), track);
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

pub(crate) struct RtcAudioSource {
    track: LocalTrack,
    registry: TrackRegistry,
}

impl RtcAudioSource {
    pub fn new(track: LocalTrack, registry: TrackRegistry) -> Self {
        Self { track, registry }
    }
}

impl AudioSource for RtcAudioSource {
    fn track(&self) -> &LocalTrack {
        &self.track
    }

    fn dispose(&mut self) {
        self.registry.remove(&self.track.id);
    }
}

/// Capture sink: mirrors frames to preview sinks and queues them as samples.
struct SampleSink {
    samples: Mutex<Option<mpsc::Sender<VideoFrame>>>,
    previews: Mutex<Vec<Arc<dyn VideoSink>>>,
    closed: AtomicBool,
}

impl VideoSink for SampleSink {
    fn on_frame(&self, frame: &VideoFrame) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let previews = self
            .previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for preview in previews {
            preview.on_frame(frame);
        }
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(samples) = samples.as_ref() {
            if samples.try_send(frame.clone()).is_err() {
                trace!("Sample writer behind, dropping frame");
            }
        }
    }
}

pub(crate) struct RtcVideoSource {
    track: LocalTrack,
    sink: Arc<SampleSink>,
    registry: TrackRegistry,
}

impl RtcVideoSource {
    /// Registers `local` and starts its sample writer on `runtime`.
    pub fn new(
        track: LocalTrack,
        local: Arc<TrackLocalStaticSample>,
        registry: TrackRegistry,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SAMPLE_BACKLOG);
        registry.insert(&track.id, local.clone());
        runtime.spawn(write_samples(local, rx));
        Self {
            track,
            sink: Arc::new(SampleSink {
                samples: Mutex::new(Some(tx)),
                previews: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
            registry,
        }
    }
}

impl VideoSource for RtcVideoSource {
    fn track(&self) -> &LocalTrack {
        &self.track
    }

    fn capture_sink(&self) -> Arc<dyn VideoSink> {
        self.sink.clone()
    }

    fn add_sink(&mut self, sink: Arc<dyn VideoSink>) {
        self.sink
            .previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    fn dispose(&mut self) {
        self.sink.closed.store(true, Ordering::Release);
        self.sink
            .previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.sink
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.registry.remove(&self.track.id);
    }
}

fn frame_duration(previous_us: Option<u64>, current_us: u64) -> Duration {
    previous_us
        .map(|prev| Duration::from_micros(current_us.saturating_sub(prev)))
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_FRAME_DURATION)
}

async fn write_samples(track: Arc<TrackLocalStaticSample>, mut frames: mpsc::Receiver<VideoFrame>) {
    let mut previous = None;
    while let Some(frame) = frames.recv().await {
        let duration = frame_duration(previous, frame.timestamp_us);
        previous = Some(frame.timestamp_us);
        let sample = Sample {
            data: Bytes::from(frame.data),
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("Writing sample to {} failed: {e}", track.id());
        }
    }
    debug!("Sample writer for {} stopped", track.id());
}

/// Remote video track. Frames carry the reassembled RTP payload of one
/// video frame; decoding is left to the surface.
pub(crate) struct RtcRemoteVideoTrack {
    id: String,
    sinks: Arc<Mutex<Vec<Arc<dyn VideoSink>>>>,
}

impl RtcRemoteVideoTrack {
    /// Starts reading `track` on the current runtime.
    pub fn spawn(track: Arc<TrackRemote>) -> Self {
        let sinks = Arc::new(Mutex::new(Vec::new()));
        let id = track.id().to_string();
        tokio::spawn(read_frames(track, id.clone(), sinks.clone()));
        Self { id, sinks }
    }
}

impl RemoteVideoTrack for RtcRemoteVideoTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn add_sink(&mut self, sink: Arc<dyn VideoSink>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }
}

/// Accumulates RTP payloads into whole frames, split on the marker bit.
struct FrameAssembler {
    payload: BytesMut,
    limit: usize,
}

impl FrameAssembler {
    fn new(limit: usize) -> Self {
        Self {
            payload: BytesMut::new(),
            limit,
        }
    }

    /// Adds one packet's payload; returns the frame it completes, if any.
    fn push(&mut self, payload: &[u8], marker: bool) -> Option<Vec<u8>> {
        if self.payload.len() + payload.len() > self.limit {
            debug!(
                "Discarding {} byte partial frame over the {} byte limit",
                self.payload.len() + payload.len(),
                self.limit
            );
            self.payload.clear();
            return None;
        }
        self.payload.extend_from_slice(payload);
        marker.then(|| self.payload.split().to_vec())
    }
}

async fn read_frames(track: Arc<TrackRemote>, id: String, sinks: Arc<Mutex<Vec<Arc<dyn VideoSink>>>>) {
    let mut frames = FrameAssembler::new(MAX_FRAME_BYTES);
    while let Ok((packet, _)) = track.read_rtp().await {
        let Some(data) = frames.push(&packet.payload, packet.header.marker) else {
            continue;
        };
        let frame = VideoFrame {
            width: 0,
            height: 0,
            timestamp_us: u64::from(packet.header.timestamp) * 1_000_000 / VIDEO_CLOCK_RATE,
            data,
        };
        let targets = sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in targets {
            sink.on_frame(&frame);
        }
    }
    debug!("Remote track {id} ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_follows_timestamps() {
        assert_eq!(frame_duration(None, 1_000), DEFAULT_FRAME_DURATION);
        assert_eq!(frame_duration(Some(1_000), 1_000), DEFAULT_FRAME_DURATION);
        assert_eq!(frame_duration(Some(1_000), 21_000), Duration::from_millis(20));
    }

    #[test]
    fn test_assembler_splits_on_marker() {
        let mut frames = FrameAssembler::new(16);
        assert_eq!(frames.push(b"ab", false), None);
        assert_eq!(frames.push(b"cd", true), Some(b"abcd".to_vec()));
        assert_eq!(frames.push(b"ef", true), Some(b"ef".to_vec()));
    }

    #[test]
    fn test_assembler_drops_oversized_partial_frame() {
        let mut frames = FrameAssembler::new(4);
        assert_eq!(frames.push(b"abc", false), None);
        // Would reach five bytes, so everything buffered is thrown away.
        assert_eq!(frames.push(b"de", false), None);
        assert_eq!(frames.push(b"fg", true), Some(b"fg".to_vec()));
    }

    #[test]
    fn test_registry_tracks_by_id() {
        let registry = TrackRegistry::default();
        let track = Arc::new(TrackLocalStaticSample::new(
            Default::default(),
            "camera".into(),
            "RemoteSupport".into(),
        ));
        registry.insert("camera", track);
        assert!(registry.get("camera").is_some());
        registry.remove("camera");
        assert!(registry.get("camera").is_none());
    }
}
