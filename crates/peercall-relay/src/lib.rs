//! peercall signaling relay.
//!
//! Every websocket connection joins one room. Each text frame a member sends
//! is rebroadcast to all other members; nothing is echoed back to the sender.
//! Payloads are relayed verbatim and only inspected for logging.

#![forbid(unsafe_code)]

pub mod room;

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use peercall_common::SignalingMessage;

pub use room::{MemberId, Room};

/// Largest text frame accepted from a member.
pub const MAX_TEXT_BYTES: usize = 64 * 1024;

pub fn router(room: Room) -> Router {
    Router::new()
        .route("/", get(|| async { "peercall relay online" }))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(room)
}

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, room: Room, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("relay listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router(room).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

async fn health(State(room): State<Room>) -> String {
    format!("ok, {} members", room.len())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(room): State<Room>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_TEXT_BYTES)
        .max_frame_size(MAX_TEXT_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, room, addr))
}

async fn handle_socket(socket: WebSocket, room: Room, addr: SocketAddr) {
    let (id, mut outbox) = room.join();
    info!("member {id} connected from {addr}");

    let (mut sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => relay(&room, id, &text),
                    Message::Binary(data) => {
                        debug!("member {id} sent {} binary bytes, ignoring", data.len());
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    room.leave(id);
    writer.abort();
    info!("member {id} disconnected");
}

fn relay(room: &Room, from: MemberId, text: &str) {
    if text.len() > MAX_TEXT_BYTES {
        warn!("member {from} sent {} bytes, over the {MAX_TEXT_BYTES} byte limit", text.len());
        return;
    }
    match SignalingMessage::from_json(text) {
        Ok(message) => debug!("relaying {} from {from}", message.kind()),
        Err(e) => debug!("relaying unrecognised text from {from}: {e}"),
    }
    let delivered = room.broadcast(from, text);
    debug!("delivered to {delivered} members");
}
