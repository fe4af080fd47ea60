//! Call negotiation state machine.
//!
//! The negotiator is only ever driven from one task. Every collaborator
//! reports back through the same [`Event`] channel, so there is no locking
//! around call state and engine completions are matched to their call
//! attempt by [`Generation`].

use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use peercall_common::{IceCandidate, SignalingMessage};
use peercall_media::CaptureToken;

use crate::agent::{CallDeps, CallSnapshot, CallState, Event, HostCommand, Notice};
use crate::engine::{ConnectionPhase, EngineEvent, EngineEvents, EngineOp, Generation, SessionDescription};
use crate::permission::{PendingOffer, PermissionGate, PermissionHandle};
use crate::queue::CandidateQueue;
use crate::session::{MediaSession, SessionContext, Sinks};
use crate::transport::SignalingTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Offerer,
    Answerer,
}

/// Progress through the offer/answer exchange. Each step names the engine
/// completion it is waiting for.
#[derive(Debug)]
enum Step {
    CreatingOffer,
    SettingLocalOffer(SessionDescription),
    AwaitingAnswer,
    SettingRemoteAnswer,
    SettingRemoteOffer,
    CreatingAnswer,
    SettingLocalAnswer(SessionDescription),
    Complete,
}

struct ActiveCall {
    generation: Generation,
    role: Role,
    step: Step,
    connected: bool,
    media: MediaSession,
}

pub struct Negotiator {
    ctx: SessionContext,
    transport: Option<Arc<dyn SignalingTransport>>,
    notices: mpsc::UnboundedSender<Notice>,
    events: mpsc::UnboundedSender<Event>,
    gate: PermissionGate,
    queue: Option<CandidateQueue>,
    call: Option<ActiveCall>,
    next_generation: u64,
}

impl Negotiator {
    /// `events` is the sender side of the channel this negotiator is fed
    /// from; engines and the permission handle report through it.
    pub fn new(
        deps: CallDeps,
        events: mpsc::UnboundedSender<Event>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let ctx = SessionContext {
            config: deps.config,
            backend: deps.backend,
            devices: deps.devices,
            surfaces: deps.surfaces,
            sinks: Sinks::default(),
        };
        Self {
            ctx,
            transport: deps.transport,
            notices,
            gate: PermissionGate::new(events.clone()),
            events,
            queue: None,
            call: None,
            next_generation: 1,
        }
    }

    pub fn permission(&self) -> PermissionHandle {
        self.gate.handle()
    }

    pub fn state(&self) -> CallState {
        match &self.call {
            Some(call) if call.connected => CallState::Active,
            Some(_) => CallState::Negotiating,
            None if self.gate.has_pending() => CallState::AwaitingPermission,
            None => CallState::Idle,
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.state(),
            generation: self.call.as_ref().map(|c| c.generation),
            queued_candidates: self.queue.as_ref().map(CandidateQueue::len),
            has_data_channel: self
                .call
                .as_ref()
                .map(|c| c.media.has_data_channel())
                .unwrap_or(false),
            permission_granted: self.gate.is_granted(),
        }
    }

    /// Processes one event. Returns `false` once the agent should stop.
    pub fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Host(command) => self.on_host(command),
            Event::Signaling(message) => self.on_signaling(message),
            Event::PermissionGranted => self.on_permission_granted(),
            Event::Engine { generation, event } => self.on_engine(generation, event),
            Event::Shutdown => {
                self.hang();
                return false;
            }
        }
        true
    }

    fn on_host(&mut self, command: HostCommand) {
        match command {
            HostCommand::Call => self.call(),
            HostCommand::Hang => self.hang(),
            HostCommand::Decline => self.decline(),
            HostCommand::SendData(text) => self.send_data(&text),
            HostCommand::AttachTransport(transport) => {
                debug!("Signaling transport attached");
                self.transport = Some(transport);
            }
            HostCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Starts an outgoing call. Requires the capture grant.
    pub fn call(&mut self) {
        let Some(token) = self.gate.token() else {
            error!("Cannot call before capture permission was granted");
            self.notify(Notice::PermissionRequired);
            return;
        };
        self.hang();

        let Some(mut call) = self.start_session(Role::Offerer, &token) else {
            return;
        };
        let label = self.ctx.config.data_channel_label.as_str();
        if let Err(e) = call.media.open_data_channel(label) {
            warn!("Calling without a data channel: {e}");
        }
        if let Some(engine) = call.media.engine() {
            engine.create_offer();
        }
        call.step = Step::CreatingOffer;
        info!("Calling, session {}", call.generation);
        self.queue = Some(CandidateQueue::new());
        self.call = Some(call);
    }

    /// Tears down the call, the pending offer and any buffered candidates.
    /// Does nothing when idle.
    pub fn hang(&mut self) {
        if let Some(queue) = self.queue.take() {
            debug!("Discarding {} buffered candidates", queue.len());
        }
        if self.gate.take_pending().is_some() {
            info!("Discarded pending incoming call");
        }
        if let Some(mut call) = self.call.take() {
            info!("Ending call {}", call.generation);
            call.media.close(&self.ctx);
        }
    }

    /// Rejects the incoming call that waits for permission.
    pub fn decline(&mut self) {
        if self.gate.take_pending().is_none() {
            error!("No incoming call to decline");
            return;
        }
        self.queue = None;
        info!("Declined incoming call");
    }

    pub fn send_data(&mut self, text: &str) {
        match &self.call {
            Some(call) => {
                if let Err(e) = call.media.send_data(text) {
                    warn!("Dropping outgoing data: {e}");
                }
            }
            None => warn!("Dropping outgoing data, no call"),
        }
    }

    fn on_signaling(&mut self, message: SignalingMessage) {
        debug!("Received {} message", message.kind());
        match message {
            SignalingMessage::Offer { sdp } => self.on_offer(sdp),
            SignalingMessage::Answer { sdp } => self.on_answer(sdp),
            SignalingMessage::Candidate(candidate) => self.on_candidate(candidate),
        }
    }

    fn on_offer(&mut self, sdp: String) {
        if self.call.is_some() {
            warn!("Offer received during a call, ending the current call");
            self.notify(Notice::CalledWhileInCall);
        }
        self.hang();
        self.queue = Some(CandidateQueue::new());

        match self.gate.token() {
            Some(token) => self.answer_offer(sdp, &token),
            None => {
                info!("Incoming call waits for capture permission");
                self.gate.hold(PendingOffer { sdp });
                self.notify(Notice::IncomingCallNeedsPermission);
            }
        }
    }

    fn on_permission_granted(&mut self) {
        let Some(offer) = self.gate.take_pending() else {
            debug!("Capture permission granted");
            return;
        };
        match self.gate.token() {
            Some(token) => {
                info!("Capture permission granted, answering pending call");
                self.answer_offer(offer.sdp, &token);
            }
            None => {
                self.gate.hold(offer);
            }
        }
    }

    fn answer_offer(&mut self, sdp: String, token: &CaptureToken) {
        let Some(mut call) = self.start_session(Role::Answerer, token) else {
            self.queue = None;
            return;
        };
        if let Some(engine) = call.media.engine() {
            engine.set_remote_description(SessionDescription::offer(sdp));
        }
        call.step = Step::SettingRemoteOffer;
        info!("Answering call, session {}", call.generation);
        self.call = Some(call);
    }

    fn on_answer(&mut self, sdp: String) {
        let Some(call) = self.call.as_mut() else {
            warn!("Discarding answer, no call");
            return;
        };
        if call.role != Role::Offerer || !matches!(call.step, Step::AwaitingAnswer) {
            warn!(
                "Discarding unexpected answer ({:?} at {:?})",
                call.role, call.step
            );
            return;
        }
        if let Some(engine) = call.media.engine() {
            engine.set_remote_description(SessionDescription::answer(sdp));
        }
        call.step = Step::SettingRemoteAnswer;
    }

    fn on_candidate(&mut self, candidate: IceCandidate) {
        if let Some(queue) = self.queue.as_mut() {
            queue.push(candidate);
            debug!("Buffered remote candidate ({} queued)", queue.len());
            return;
        }
        match self.call.as_mut().and_then(|c| c.media.engine()) {
            Some(engine) => engine.add_ice_candidate(candidate),
            None => debug!("Dropping remote candidate, no call"),
        }
    }

    fn on_engine(&mut self, generation: Generation, event: EngineEvent) {
        let current = self.call.as_ref().map(|c| c.generation);
        if current != Some(generation) {
            debug!("Discarding stale {} from session {generation}", event.name());
            if let EngineEvent::DataChannel(mut channel) = event {
                channel.dispose();
            }
            return;
        }
        let Some(call) = self.call.as_mut() else {
            return;
        };

        match event {
            EngineEvent::OfferCreated(description) => {
                if !matches!(call.step, Step::CreatingOffer) {
                    warn!("Ignoring offer created at {:?}", call.step);
                    return;
                }
                if let Some(engine) = call.media.engine() {
                    engine.set_local_description(description.clone());
                }
                call.step = Step::SettingLocalOffer(description);
            }
            EngineEvent::AnswerCreated(description) => {
                if !matches!(call.step, Step::CreatingAnswer) {
                    warn!("Ignoring answer created at {:?}", call.step);
                    return;
                }
                if let Some(engine) = call.media.engine() {
                    engine.set_local_description(description.clone());
                }
                call.step = Step::SettingLocalAnswer(description);
            }
            EngineEvent::LocalDescriptionSet => match mem::replace(&mut call.step, Step::Complete) {
                Step::SettingLocalOffer(description) => {
                    call.step = Step::AwaitingAnswer;
                    self.send(SignalingMessage::offer(description.sdp));
                }
                Step::SettingLocalAnswer(description) => {
                    self.send(SignalingMessage::answer(description.sdp));
                    self.drain_queue();
                }
                other => {
                    warn!("Ignoring local description set at {other:?}");
                    call.step = other;
                }
            },
            EngineEvent::RemoteDescriptionSet => match mem::replace(&mut call.step, Step::Complete) {
                Step::SettingRemoteOffer => {
                    call.step = Step::CreatingAnswer;
                    if let Some(engine) = call.media.engine() {
                        engine.create_answer();
                    }
                }
                Step::SettingRemoteAnswer => self.drain_queue(),
                other => {
                    warn!("Ignoring remote description set at {other:?}");
                    call.step = other;
                }
            },
            EngineEvent::OperationFailed { op, reason } => match op {
                // These degrade the session; the call goes on without them.
                EngineOp::AddIceCandidate | EngineOp::AddTrack => {
                    warn!("Failed to {op}: {reason}");
                }
                EngineOp::CreateDataChannel => {
                    warn!("Failed to {op}: {reason}");
                    call.media.drop_data_channel();
                }
                _ => {
                    error!("Failed to {op} in session {generation}: {reason}");
                    self.notify(Notice::CallFailed(format!("{op} failed: {reason}")));
                    self.hang();
                }
            },
            EngineEvent::LocalCandidate(candidate) => {
                self.send(SignalingMessage::candidate(candidate));
            }
            EngineEvent::PhaseChanged(phase) => self.on_phase(phase),
            EngineEvent::RemoteVideoTrack(track) => {
                call.media.route_remote_track(&self.ctx, track);
            }
            EngineEvent::DataChannel(channel) => call.media.set_data_channel(channel),
            EngineEvent::DataChannelText { label, text } => {
                debug!("Data channel {label} received {} bytes", text.len());
                self.notify(Notice::DataChannelText(text));
            }
            EngineEvent::DataChannelBinary { label, len } => {
                debug!("Ignoring {len} binary bytes on data channel {label}");
            }
        }
    }

    fn on_phase(&mut self, phase: ConnectionPhase) {
        match phase {
            ConnectionPhase::Connected => {
                if let Some(call) = self.call.as_mut() {
                    if !call.connected {
                        call.connected = true;
                        info!("Call {} connected", call.generation);
                        self.notify(Notice::Connected);
                    }
                }
            }
            ConnectionPhase::Disconnected | ConnectionPhase::Failed => {
                warn!("Connection {phase:?}, ending call");
                self.hang();
                self.notify(Notice::Disconnected);
            }
            other => debug!("Connection phase {other:?}"),
        }
    }

    fn start_session(&mut self, role: Role, token: &CaptureToken) -> Option<ActiveCall> {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;
        let events = EngineEvents::new(generation, self.events.clone());
        match MediaSession::open(&self.ctx, Some(token), events) {
            Ok(media) => Some(ActiveCall {
                generation,
                role,
                step: Step::Complete,
                connected: false,
                media,
            }),
            Err(e) => {
                error!("Failed to set up media for session {generation}: {e}");
                self.notify(Notice::CallFailed(e.to_string()));
                None
            }
        }
    }

    /// Applies buffered candidates once the remote description is in place.
    fn drain_queue(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        match self.call.as_mut().and_then(|c| c.media.engine()) {
            Some(engine) => {
                let applied = queue.drain_into(engine);
                debug!("Applied {applied} buffered candidates");
            }
            None => debug!("Dropping {} buffered candidates, no engine", queue.len()),
        }
    }

    fn send(&self, message: SignalingMessage) {
        let Some(transport) = &self.transport else {
            error!("No signaling transport, dropping {} message", message.kind());
            return;
        };
        if let Err(e) = transport.send(&message) {
            error!("Failed to send {} message: {e}", message.kind());
        }
    }

    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            debug!("Host stopped listening for notices");
        }
    }
}
