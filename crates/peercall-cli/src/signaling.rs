//! Websocket link between the call agent and the signaling relay.

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};

use peercall_common::SignalingMessage;
use peercall_core::CallHandle;

/// Connects to `url`, then forwards outbound messages as text frames and
/// inbound text frames to `handle` until either side closes.
pub async fn run(
    url: String,
    handle: CallHandle,
    mut outbound: mpsc::UnboundedReceiver<SignalingMessage>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    info!("Connected to signaling relay: {url}");
    let (mut write, mut read) = ws_stream.split();

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode {} message: {e}", message.kind());
                    continue;
                }
            };
            debug!("Sending {}", message.kind());
            if let Err(e) = write.send(WsMessage::Text(text)).await {
                error!("Failed to send signaling message: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let result = loop {
        tokio::select! {
            _ = &mut writer => break Err(anyhow!("signaling writer stopped")),
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Err(e) = handle.on_signaling_text(&text) {
                        warn!("Skipping malformed signaling frame: {e}");
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    break Err(anyhow!("signaling relay closed the connection"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(anyhow!("signaling websocket error: {e}")),
            },
        }
    };
    writer.abort();
    result
}
