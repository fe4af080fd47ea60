use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use peercall_media::CaptureToken;

use crate::agent::Event;

/// Inbound offer held back until capture is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub sdp: String,
}

#[derive(Default)]
struct GrantState {
    token: Mutex<Option<CaptureToken>>,
}

impl GrantState {
    fn token(&self) -> Option<CaptureToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Negotiator-side view of the capture permission.
///
/// Holds at most one pending offer. The grant itself lives in shared state so
/// [`PermissionHandle`] can set and query it from any thread.
pub struct PermissionGate {
    shared: Arc<GrantState>,
    pending: Option<PendingOffer>,
    tx: mpsc::UnboundedSender<Event>,
}

impl PermissionGate {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            shared: Arc::new(GrantState::default()),
            pending: None,
            tx,
        }
    }

    pub fn handle(&self) -> PermissionHandle {
        PermissionHandle {
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.shared.token().is_some()
    }

    pub fn token(&self) -> Option<CaptureToken> {
        self.shared.token()
    }

    /// Stores `offer` as the pending offer, returning the one it replaced.
    pub fn hold(&mut self, offer: PendingOffer) -> Option<PendingOffer> {
        self.pending.replace(offer)
    }

    pub fn take_pending(&mut self) -> Option<PendingOffer> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Thread-safe handle the host uses to grant capture permission.
#[derive(Clone)]
pub struct PermissionHandle {
    shared: Arc<GrantState>,
    tx: mpsc::UnboundedSender<Event>,
}

impl PermissionHandle {
    /// Records the grant and wakes the negotiator. Granting again only
    /// replaces the token; a pending offer is processed once.
    pub fn grant(&self, token: CaptureToken) {
        *self
            .shared
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
        if self.tx.send(Event::PermissionGranted).is_err() {
            debug!("Capture permission granted after the call agent stopped");
        }
    }

    pub fn is_granted(&self) -> bool {
        self.shared.token().is_some()
    }
}
