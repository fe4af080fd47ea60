//! The call agent: one task owning the negotiator, fed by one channel.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use peercall_common::{Error, Result, SignalingMessage};
use peercall_media::{CaptureToken, DeviceSubsystem};

use crate::config::CallConfig;
use crate::engine::{EngineEvent, Generation, MediaBackend};
use crate::negotiator::Negotiator;
use crate::permission::PermissionHandle;
use crate::session::Surfaces;
use crate::transport::SignalingTransport;

/// Where the negotiator stands. A finished attempt is `Idle` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AwaitingPermission,
    Negotiating,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub state: CallState,
    pub generation: Option<Generation>,
    pub queued_candidates: Option<usize>,
    pub has_data_channel: bool,
    pub permission_granted: bool,
}

/// User-visible notifications for the host shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A local call needs the capture grant first.
    PermissionRequired,
    /// An incoming call waits for the capture grant.
    IncomingCallNeedsPermission,
    /// A new offer ended the running call.
    CalledWhileInCall,
    Connected,
    Disconnected,
    CallFailed(String),
    DataChannelText(String),
}

pub enum HostCommand {
    Call,
    Hang,
    Decline,
    SendData(String),
    AttachTransport(Arc<dyn SignalingTransport>),
    Snapshot(oneshot::Sender<CallSnapshot>),
}

impl fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::Call => f.write_str("Call"),
            HostCommand::Hang => f.write_str("Hang"),
            HostCommand::Decline => f.write_str("Decline"),
            HostCommand::SendData(text) => write!(f, "SendData({} bytes)", text.len()),
            HostCommand::AttachTransport(_) => f.write_str("AttachTransport"),
            HostCommand::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// Everything the negotiator reacts to.
pub enum Event {
    Host(HostCommand),
    Signaling(SignalingMessage),
    PermissionGranted,
    Engine {
        generation: Generation,
        event: EngineEvent,
    },
    Shutdown,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Host(command) => write!(f, "Host({command:?})"),
            Event::Signaling(message) => write!(f, "Signaling({})", message.kind()),
            Event::PermissionGranted => f.write_str("PermissionGranted"),
            Event::Engine { generation, event } => write!(f, "Engine({generation}, {event:?})"),
            Event::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Injected collaborators of a call agent.
pub struct CallDeps {
    pub config: CallConfig,
    pub backend: Arc<dyn MediaBackend>,
    pub devices: Arc<dyn DeviceSubsystem>,
    pub surfaces: Surfaces,
    pub transport: Option<Arc<dyn SignalingTransport>>,
}

/// Cloneable front of a running call agent. Every method only enqueues.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<Event>,
    permission: PermissionHandle,
}

impl CallHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>, permission: PermissionHandle) -> Self {
        Self { tx, permission }
    }

    fn post(&self, event: Event) {
        if self.tx.send(event).is_err() {
            warn!("Call agent is not running, dropping request");
        }
    }

    pub fn call(&self) {
        self.post(Event::Host(HostCommand::Call));
    }

    pub fn hang(&self) {
        self.post(Event::Host(HostCommand::Hang));
    }

    pub fn decline_support_call(&self) {
        self.post(Event::Host(HostCommand::Decline));
    }

    /// Grants capture permission. Safe to call from any thread.
    pub fn set_screen_capture_projection_data(&self, token: CaptureToken) {
        self.permission.grant(token);
    }

    pub fn is_permission_granted(&self) -> bool {
        self.permission.is_granted()
    }

    pub fn on_signaling_received(&self, message: SignalingMessage) {
        self.post(Event::Signaling(message));
    }

    /// Parses a wire frame and forwards it. Malformed frames are rejected
    /// without reaching the negotiator.
    pub fn on_signaling_text(&self, text: &str) -> Result<()> {
        let message = SignalingMessage::from_json(text)?;
        self.on_signaling_received(message);
        Ok(())
    }

    pub fn send_data(&self, text: impl Into<String>) {
        self.post(Event::Host(HostCommand::SendData(text.into())));
    }

    pub fn attach_transport(&self, transport: Arc<dyn SignalingTransport>) {
        self.post(Event::Host(HostCommand::AttachTransport(transport)));
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Event::Host(HostCommand::Snapshot(tx)))
            .map_err(|_| Error::internal("call agent is not running"))?;
        rx.await
            .map_err(|_| Error::internal("call agent stopped before answering"))
    }

    /// Ends any call and stops the agent task.
    pub fn shutdown(&self) {
        self.post(Event::Shutdown);
    }
}

/// A spawned negotiator task.
pub struct CallAgent {
    pub handle: CallHandle,
    pub notices: mpsc::UnboundedReceiver<Notice>,
    pub task: JoinHandle<()>,
}

impl CallAgent {
    /// Spawns the agent on the current tokio runtime.
    pub fn spawn(deps: CallDeps) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let negotiator = Negotiator::new(deps, tx.clone(), notice_tx);
        let handle = CallHandle::new(tx, negotiator.permission());
        let task = tokio::spawn(run(negotiator, rx));
        Self {
            handle,
            notices,
            task,
        }
    }
}

async fn run(mut negotiator: Negotiator, mut rx: mpsc::UnboundedReceiver<Event>) {
    info!("Call agent started");
    while let Some(event) = rx.recv().await {
        if !negotiator.handle(event) {
            break;
        }
    }
    negotiator.hang();
    info!("Call agent stopped");
}
