use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames queued per member. A member that falls this far behind is
/// disconnected.
pub const OUTBOX_CAPACITY: usize = 64;

pub type MemberId = Uuid;

/// The single room every connection joins.
#[derive(Clone, Default)]
pub struct Room {
    members: Arc<Mutex<HashMap<MemberId, mpsc::Sender<String>>>>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MemberId, mpsc::Sender<String>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a member and returns its id and the receiving end of its outbox.
    pub fn join(&self) -> (MemberId, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.lock().insert(id, tx);
        (id, rx)
    }

    pub fn leave(&self, id: MemberId) {
        if self.lock().remove(&id).is_none() {
            debug!("member {id} already left");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queues `text` for every member except `from`. Returns how many
    /// members it was queued for.
    ///
    /// A member whose outbox is full is evicted. Dropping its sender ends the
    /// writer task and with it the connection.
    pub fn broadcast(&self, from: MemberId, text: &str) -> usize {
        let mut members = self.lock();
        let mut delivered = 0;
        let mut evicted = Vec::new();
        for (id, outbox) in members.iter().filter(|(id, _)| **id != from) {
            match outbox.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => evicted.push(*id),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("member {id} is disconnecting")
                }
            }
        }
        for id in evicted {
            warn!("outbox of member {id} is full, disconnecting it");
            members.remove(&id);
        }
        delivered
    }
}
