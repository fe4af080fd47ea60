//! Seams towards the media engine and the connectivity engine.
//!
//! Engine operations never block: every request returns immediately and its
//! outcome arrives later through the [`EngineEvents`] sink the engine was
//! created with. The sink stamps each event with the session generation so
//! completions belonging to a torn down session can be told apart.

use std::fmt;

use anyhow::Result;
use tokio::sync::mpsc;

use peercall_common::IceCandidate;
use peercall_media::{AudioSource, LocalTrack, RemoteVideoTrack, RenderContext, VideoFeed, VideoSource};

use crate::agent::Event;
use crate::config::RtcConfig;

/// Identity of one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connection state reported by the connectivity engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    AddTrack,
    CreateDataChannel,
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineOp::CreateOffer => "create offer",
            EngineOp::CreateAnswer => "create answer",
            EngineOp::SetLocalDescription => "set local description",
            EngineOp::SetRemoteDescription => "set remote description",
            EngineOp::AddIceCandidate => "add ice candidate",
            EngineOp::AddTrack => "add track",
            EngineOp::CreateDataChannel => "create data channel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelInit {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub max_packet_life_time_ms: Option<u16>,
    /// Pre-negotiated stream id; `None` lets the engine pick one in-band.
    pub negotiated_id: Option<u16>,
}

impl Default for DataChannelInit {
    fn default() -> Self {
        Self {
            ordered: true,
            max_retransmits: None,
            max_packet_life_time_ms: None,
            negotiated_id: None,
        }
    }
}

/// Small bidirectional side channel negotiated with the media session.
pub trait DataChannel: Send {
    fn label(&self) -> &str;
    fn send_text(&self, text: &str) -> Result<()>;
    fn dispose(&mut self);
}

/// Transport that performs path discovery and carries encrypted media.
pub trait ConnectivityEngine: Send {
    fn create_offer(&mut self);
    fn create_answer(&mut self);
    fn set_local_description(&mut self, description: SessionDescription);
    fn set_remote_description(&mut self, description: SessionDescription);
    fn add_ice_candidate(&mut self, candidate: IceCandidate);
    fn add_track(&mut self, track: &LocalTrack) -> Result<()>;
    fn create_data_channel(
        &mut self,
        label: &str,
        init: &DataChannelInit,
    ) -> Result<Box<dyn DataChannel>>;

    /// Closes and releases the engine. No events are expected afterwards,
    /// late ones are discarded by generation.
    fn close(&mut self);
}

/// Per-session media stack: codec factories, sources and the engine.
pub trait MediaFactory: Send {
    fn create_render_context(&mut self) -> Result<Box<dyn RenderContext>>;
    fn create_audio_source(&mut self, track_id: &str, stream_id: &str) -> Result<Box<dyn AudioSource>>;
    fn create_video_source(
        &mut self,
        feed: VideoFeed,
        stream_id: &str,
        screencast: bool,
    ) -> Result<Box<dyn VideoSource>>;
    fn create_engine(
        &mut self,
        config: &RtcConfig,
        events: EngineEvents,
    ) -> Result<Box<dyn ConnectivityEngine>>;
    fn dispose(&mut self);
}

/// Creates a fresh [`MediaFactory`] for every call attempt.
pub trait MediaBackend: Send + Sync {
    fn create_factory(&self) -> Result<Box<dyn MediaFactory>>;
}

/// Asynchronous engine outcomes and notifications.
pub enum EngineEvent {
    OfferCreated(SessionDescription),
    AnswerCreated(SessionDescription),
    LocalDescriptionSet,
    RemoteDescriptionSet,
    OperationFailed { op: EngineOp, reason: String },
    LocalCandidate(IceCandidate),
    PhaseChanged(ConnectionPhase),
    RemoteVideoTrack(Box<dyn RemoteVideoTrack>),
    /// Data channel announced by the remote side.
    DataChannel(Box<dyn DataChannel>),
    DataChannelText { label: String, text: String },
    DataChannelBinary { label: String, len: usize },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::OfferCreated(_) => "offer created",
            EngineEvent::AnswerCreated(_) => "answer created",
            EngineEvent::LocalDescriptionSet => "local description set",
            EngineEvent::RemoteDescriptionSet => "remote description set",
            EngineEvent::OperationFailed { .. } => "operation failed",
            EngineEvent::LocalCandidate(_) => "local candidate",
            EngineEvent::PhaseChanged(_) => "phase changed",
            EngineEvent::RemoteVideoTrack(_) => "remote video track",
            EngineEvent::DataChannel(_) => "data channel",
            EngineEvent::DataChannelText { .. } => "data channel text",
            EngineEvent::DataChannelBinary { .. } => "data channel binary",
        }
    }
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::OperationFailed { op, reason } => {
                write!(f, "OperationFailed({op}: {reason})")
            }
            EngineEvent::PhaseChanged(phase) => write!(f, "PhaseChanged({phase:?})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Sink an engine reports through. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct EngineEvents {
    generation: Generation,
    tx: mpsc::UnboundedSender<Event>,
}

impl EngineEvents {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Queues `event` for the negotiator. Dropped silently once the call
    /// agent has shut down.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(Event::Engine {
            generation: self.generation,
            event,
        });
    }

    pub fn failed(&self, op: EngineOp, reason: impl fmt::Display) {
        self.emit(EngineEvent::OperationFailed {
            op,
            reason: reason.to_string(),
        });
    }

    pub fn phase_changed(&self, phase: ConnectionPhase) {
        self.emit(EngineEvent::PhaseChanged(phase));
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(EngineEvent::LocalCandidate(candidate));
    }
}
