#![forbid(unsafe_code)]

//! Call negotiation for a single peer-to-peer media session.
//!
//! [`CallAgent`] owns a [`Negotiator`] on one tokio task; the host talks to
//! it through a [`CallHandle`] and listens for [`Notice`]s. Media and
//! connectivity are reached only through the traits in [`engine`] and
//! [`peercall_media`], so any backend (or a test fake) can be plugged in.

pub mod agent;
pub mod config;
pub mod engine;
pub mod negotiator;
pub mod permission;
pub mod queue;
pub mod session;
pub mod transport;

pub use agent::{
    CallAgent, CallDeps, CallHandle, CallSnapshot, CallState, Event, HostCommand, Notice,
};
pub use config::{CallConfig, IceServer, RtcConfig};
pub use engine::{
    ConnectionPhase, ConnectivityEngine, DataChannel, DataChannelInit, EngineEvent, EngineEvents,
    EngineOp, Generation, MediaBackend, MediaFactory, SdpType, SessionDescription,
};
pub use negotiator::Negotiator;
pub use permission::{PendingOffer, PermissionHandle};
pub use queue::CandidateQueue;
pub use session::{MediaSession, Surfaces};
pub use transport::{ChannelTransport, SignalingTransport};
