use tokio::sync::mpsc;

use peercall_common::{Error, Result, SignalingMessage};

/// Outbound half of the signaling channel. Inbound messages reach the
/// negotiator through [`crate::CallHandle::on_signaling_received`].
pub trait SignalingTransport: Send + Sync {
    fn send(&self, message: &SignalingMessage) -> Result<()>;
}

/// Transport that hands messages to a channel, typically drained by a
/// websocket writer task.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SignalingTransport for ChannelTransport {
    fn send(&self, message: &SignalingMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| Error::transport("signaling channel closed"))
    }
}
