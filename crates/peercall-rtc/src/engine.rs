//! Connectivity engine over a webrtc-rs peer connection.
//!
//! Requests are queued to one worker task per engine, which owns the peer
//! connection and applies them strictly in order. Outcomes are reported
//! through [`EngineEvents`].

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use peercall_common::IceCandidate;
use peercall_core::{
    ConnectionPhase, ConnectivityEngine, DataChannel, DataChannelInit, EngineEvent, EngineEvents,
    EngineOp, RtcConfig, SdpType, SessionDescription,
};
use peercall_media::LocalTrack;

use crate::channel::{self, RtcDataChannel};
use crate::config::{rtc_configuration, setting_engine};
use crate::tracks::{RtcRemoteVideoTrack, TrackRegistry};

enum Op {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    AddTrack(Arc<TrackLocalStaticSample>),
    CreateDataChannel {
        label: String,
        init: DataChannelInit,
        outbox: mpsc::UnboundedReceiver<String>,
    },
}

impl Op {
    fn kind(&self) -> EngineOp {
        match self {
            Op::CreateOffer => EngineOp::CreateOffer,
            Op::CreateAnswer => EngineOp::CreateAnswer,
            Op::SetLocal(_) => EngineOp::SetLocalDescription,
            Op::SetRemote(_) => EngineOp::SetRemoteDescription,
            Op::AddCandidate(_) => EngineOp::AddIceCandidate,
            Op::AddTrack(_) => EngineOp::AddTrack,
            Op::CreateDataChannel { .. } => EngineOp::CreateDataChannel,
        }
    }
}

pub struct RtcEngine {
    ops: Option<mpsc::UnboundedSender<Op>>,
    registry: TrackRegistry,
    events: EngineEvents,
}

impl RtcEngine {
    pub(crate) fn spawn(
        runtime: &Handle,
        config: RtcConfig,
        registry: TrackRegistry,
        events: EngineEvents,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(config, events.clone(), rx));
        Self {
            ops: Some(tx),
            registry,
            events,
        }
    }

    fn submit(&self, op: Op) {
        let kind = op.kind();
        let queued = self.ops.as_ref().map(|ops| ops.send(op).is_ok());
        if queued != Some(true) {
            self.events.failed(kind, "engine closed");
        }
    }
}

impl ConnectivityEngine for RtcEngine {
    fn create_offer(&mut self) {
        self.submit(Op::CreateOffer);
    }

    fn create_answer(&mut self) {
        self.submit(Op::CreateAnswer);
    }

    fn set_local_description(&mut self, description: SessionDescription) {
        self.submit(Op::SetLocal(description));
    }

    fn set_remote_description(&mut self, description: SessionDescription) {
        self.submit(Op::SetRemote(description));
    }

    fn add_ice_candidate(&mut self, candidate: IceCandidate) {
        self.submit(Op::AddCandidate(candidate));
    }

    fn add_track(&mut self, track: &LocalTrack) -> Result<()> {
        let local = self
            .registry
            .get(&track.id)
            .ok_or_else(|| anyhow!("unknown local track {}", track.id))?;
        self.submit(Op::AddTrack(local));
        Ok(())
    }

    fn create_data_channel(
        &mut self,
        label: &str,
        init: &DataChannelInit,
    ) -> Result<Box<dyn DataChannel>> {
        if self.ops.is_none() {
            return Err(anyhow!("engine closed"));
        }
        let (channel, outbox) = RtcDataChannel::pending(label);
        self.submit(Op::CreateDataChannel {
            label: label.to_string(),
            init: init.clone(),
            outbox,
        });
        Ok(Box::new(channel))
    }

    fn close(&mut self) {
        if self.ops.take().is_some() {
            debug!("Closing peer connection of session {}", self.events.generation());
        }
    }
}

async fn run(config: RtcConfig, events: EngineEvents, mut ops: mpsc::UnboundedReceiver<Op>) {
    let pc = match connect(&config, &events).await {
        Ok(pc) => pc,
        Err(e) => {
            error!("Failed to create peer connection: {e:#}");
            while let Some(op) = ops.recv().await {
                events.failed(op.kind(), format!("peer connection unavailable: {e:#}"));
            }
            return;
        }
    };
    info!("Peer connection ready for session {}", events.generation());

    while let Some(op) = ops.recv().await {
        let kind = op.kind();
        if let Err(e) = apply(&pc, op, &events).await {
            events.failed(kind, format!("{e:#}"));
        }
    }

    if let Err(e) = pc.close().await {
        warn!("Failed to close peer connection: {e}");
    }
    debug!("Peer connection worker for session {} stopped", events.generation());
}

async fn connect(config: &RtcConfig, events: &EngineEvents) -> Result<Arc<RTCPeerConnection>> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine(config))
        .build();
    let pc = Arc::new(api.new_peer_connection(rtc_configuration(config)).await?);
    wire_callbacks(&pc, events);
    Ok(pc)
}

fn wire_callbacks(pc: &RTCPeerConnection, events: &EngineEvents) {
    let candidates = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidates.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                debug!("Local candidate gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => events.local_candidate(IceCandidate::new(
                    init.sdp_mid.unwrap_or_default(),
                    init.sdp_mline_index.unwrap_or_default(),
                    init.candidate,
                )),
                Err(e) => warn!("Failed to serialise local candidate: {e}"),
            }
        })
    }));

    let phases = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = phases.clone();
        Box::pin(async move {
            debug!("Peer connection state {state}");
            if let Some(phase) = connection_phase(state) {
                events.phase_changed(phase);
            }
        })
    }));

    let announced = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let events = announced.clone();
        Box::pin(async move {
            let (channel, outbox) = RtcDataChannel::pending(dc.label());
            channel::attach(dc, outbox, events.clone());
            events.emit(EngineEvent::DataChannel(Box::new(channel)));
        })
    }));

    let tracks = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            let events = tracks.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Video {
                    debug!("Ignoring remote {:?} track {}", track.kind(), track.id());
                    return;
                }
                let remote = RtcRemoteVideoTrack::spawn(track);
                events.emit(EngineEvent::RemoteVideoTrack(Box::new(remote)));
            })
        },
    ));
}

async fn apply(pc: &Arc<RTCPeerConnection>, op: Op, events: &EngineEvents) -> Result<()> {
    match op {
        Op::CreateOffer => {
            let offer = pc.create_offer(None).await?;
            events.emit(EngineEvent::OfferCreated(SessionDescription::offer(offer.sdp)));
        }
        Op::CreateAnswer => {
            let answer = pc.create_answer(None).await?;
            events.emit(EngineEvent::AnswerCreated(SessionDescription::answer(answer.sdp)));
        }
        Op::SetLocal(description) => {
            pc.set_local_description(to_rtc(description)?).await?;
            events.emit(EngineEvent::LocalDescriptionSet);
        }
        Op::SetRemote(description) => {
            pc.set_remote_description(to_rtc(description)?).await?;
            events.emit(EngineEvent::RemoteDescriptionSet);
        }
        Op::AddCandidate(candidate) => {
            pc.add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: Some(candidate.sdp_mid),
                sdp_mline_index: Some(candidate.sdp_mline_index),
                ..Default::default()
            })
            .await?;
        }
        Op::AddTrack(local) => {
            let sender = pc
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            // RTCP has to be read for interceptors to run.
            tokio::spawn(async move {
                let mut rtcp = vec![0u8; 1500];
                while sender.read(&mut rtcp).await.is_ok() {}
            });
        }
        Op::CreateDataChannel {
            label,
            init,
            outbox,
        } => {
            let dc = pc
                .create_data_channel(
                    &label,
                    Some(RTCDataChannelInit {
                        ordered: Some(init.ordered),
                        max_retransmits: init.max_retransmits,
                        max_packet_life_time: init.max_packet_life_time_ms,
                        negotiated: init.negotiated_id,
                        ..Default::default()
                    }),
                )
                .await?;
            channel::attach(dc, outbox, events.clone());
        }
    }
    Ok(())
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(rtc)
}

fn connection_phase(state: RTCPeerConnectionState) -> Option<ConnectionPhase> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionPhase::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionPhase::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionPhase::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionPhase::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionPhase::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionPhase::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}
