use std::sync::Arc;

use anyhow::Result;
use tokio::runtime::Handle;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use peercall_core::{ConnectivityEngine, EngineEvents, MediaFactory, RtcConfig};
use peercall_media::{
    AudioSource, DummyRenderContext, LocalTrack, MediaKind, RenderContext, VideoFeed, VideoSource,
};

use crate::engine::RtcEngine;
use crate::tracks::{RtcAudioSource, RtcVideoSource, TrackRegistry, VIDEO_CLOCK_RATE};

const OPUS_CLOCK_RATE: u32 = 48_000;

/// Media stack of one call attempt. Tracks created here are what its
/// engine attaches.
pub struct RtcFactory {
    runtime: Handle,
    registry: TrackRegistry,
}

impl RtcFactory {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            registry: TrackRegistry::default(),
        }
    }
}

impl MediaFactory for RtcFactory {
    fn create_render_context(&mut self) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(DummyRenderContext::default()))
    }

    fn create_audio_source(&mut self, track_id: &str, stream_id: &str) -> Result<Box<dyn AudioSource>> {
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            track_id.to_owned(),
            stream_id.to_owned(),
        ));
        self.registry.insert(track_id, local);
        debug!("Created audio track {track_id}");
        Ok(Box::new(RtcAudioSource::new(
            LocalTrack {
                id: track_id.to_owned(),
                stream_id: stream_id.to_owned(),
                kind: MediaKind::Audio,
            },
            self.registry.clone(),
        )))
    }

    fn create_video_source(
        &mut self,
        feed: VideoFeed,
        stream_id: &str,
        screencast: bool,
    ) -> Result<Box<dyn VideoSource>> {
        let track_id = feed.track_id();
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: VIDEO_CLOCK_RATE as u32,
                ..Default::default()
            },
            track_id.to_owned(),
            stream_id.to_owned(),
        ));
        debug!("Created video track {track_id} (screencast: {screencast})");
        Ok(Box::new(RtcVideoSource::new(
            LocalTrack {
                id: track_id.to_owned(),
                stream_id: stream_id.to_owned(),
                kind: MediaKind::Video,
            },
            local,
            self.registry.clone(),
            &self.runtime,
        )))
    }

    fn create_engine(
        &mut self,
        config: &RtcConfig,
        events: EngineEvents,
    ) -> Result<Box<dyn ConnectivityEngine>> {
        Ok(Box::new(RtcEngine::spawn(
            &self.runtime,
            config.clone(),
            self.registry.clone(),
            events,
        )))
    }

    fn dispose(&mut self) {
        self.registry.clear();
    }
}
