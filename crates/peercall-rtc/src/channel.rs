use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use peercall_core::{DataChannel, EngineEvent, EngineEvents};

/// Data channel handle handed out before the underlying channel exists.
///
/// Text is queued on an outbox; a writer task started by [`attach`] holds it
/// back until the channel opens and then sends in order.
pub struct RtcDataChannel {
    label: String,
    outbox: Option<mpsc::UnboundedSender<String>>,
}

impl RtcDataChannel {
    pub(crate) fn pending(label: &str) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.to_string(),
                outbox: Some(tx),
            },
            rx,
        )
    }
}

impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn send_text(&self, text: &str) -> Result<()> {
        let outbox = self
            .outbox
            .as_ref()
            .ok_or_else(|| anyhow!("data channel {} disposed", self.label))?;
        outbox
            .send(text.to_string())
            .map_err(|_| anyhow!("data channel {} closed", self.label))
    }

    fn dispose(&mut self) {
        // Dropping the outbox ends the writer, which closes the channel.
        self.outbox = None;
    }
}

/// Connects a webrtc channel to the engine events and to its outbox.
pub(crate) fn attach(
    dc: Arc<RTCDataChannel>,
    outbox: mpsc::UnboundedReceiver<String>,
    events: EngineEvents,
) {
    let label = dc.label().to_string();

    let inbound_label = label.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        let label = inbound_label.clone();
        Box::pin(async move {
            if !msg.is_string {
                events.emit(EngineEvent::DataChannelBinary {
                    label,
                    len: msg.data.len(),
                });
                return;
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => events.emit(EngineEvent::DataChannelText { label, text }),
                Err(_) => warn!("Dropping non UTF-8 text on data channel {label}"),
            }
        })
    }));

    let (open_tx, open_rx) = oneshot::channel();
    let open_tx = Arc::new(Mutex::new(Some(open_tx)));
    let signal_open = {
        let open_tx = open_tx.clone();
        move || {
            if let Some(tx) = open_tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(());
            }
        }
    };
    let on_open = signal_open.clone();
    dc.on_open(Box::new(move || {
        on_open();
        Box::pin(async {})
    }));
    if dc.ready_state() == RTCDataChannelState::Open {
        signal_open();
    }

    tokio::spawn(write_outbox(dc, label, open_rx, outbox));
}

async fn write_outbox(
    dc: Arc<RTCDataChannel>,
    label: String,
    mut open_rx: oneshot::Receiver<()>,
    mut outbox: mpsc::UnboundedReceiver<String>,
) {
    let mut open = false;
    let mut backlog = Vec::new();
    loop {
        tokio::select! {
            opened = &mut open_rx, if !open => {
                if opened.is_err() {
                    debug!("Data channel {label} dropped before opening");
                    return;
                }
                open = true;
                debug!("Data channel {label} open, flushing {} queued messages", backlog.len());
                for text in backlog.drain(..) {
                    send(&dc, &label, text).await;
                }
            }
            text = outbox.recv() => match text {
                Some(text) if open => send(&dc, &label, text).await,
                Some(text) => backlog.push(text),
                None => break,
            },
        }
    }
    if let Err(e) = dc.close().await {
        debug!("Closing data channel {label} failed: {e}");
    }
}

async fn send(dc: &RTCDataChannel, label: &str, text: String) {
    if let Err(e) = dc.send_text(text).await {
        warn!("Data channel {label} send failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_channel_queues_until_disposed() {
        let (mut channel, mut outbox) = RtcDataChannel::pending("backcontrol");
        assert_eq!(channel.label(), "backcontrol");
        channel.send_text("first").unwrap();
        channel.send_text("second").unwrap();
        assert_eq!(outbox.try_recv().unwrap(), "first");
        assert_eq!(outbox.try_recv().unwrap(), "second");

        channel.dispose();
        assert!(channel.send_text("late").is_err());
        assert!(matches!(
            outbox.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
