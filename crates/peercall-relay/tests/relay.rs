//! Relay behaviour over real websocket connections.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use peercall_relay::{Room, MAX_TEXT_BYTES};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(room: Room) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(peercall_relay::serve(listener, room, async {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx)
}

async fn connect(addr: SocketAddr, room: &Room, members: usize) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    // Joining happens after the upgrade completes on the server side.
    timeout(Duration::from_secs(5), async {
        while room.len() < members {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("member joined");
    ws
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return text;
        }
    }
}

async fn nothing_arrives(ws: &mut Client) -> bool {
    timeout(Duration::from_millis(200), ws.next()).await.is_err()
}

#[tokio::test]
async fn test_text_reaches_others_but_not_sender() {
    let room = Room::new();
    let (addr, _stop) = start(room.clone()).await;
    let mut caller = connect(addr, &room, 1).await;
    let mut callee = connect(addr, &room, 2).await;
    let mut observer = connect(addr, &room, 3).await;

    let offer = r#"{"type":"offer","sdp":"v=0"}"#;
    caller.send(Message::Text(offer.to_string())).await.unwrap();

    assert_eq!(next_text(&mut callee).await, offer);
    assert_eq!(next_text(&mut observer).await, offer);
    assert!(nothing_arrives(&mut caller).await);
}

#[tokio::test]
async fn test_unrecognised_text_is_relayed_verbatim() {
    let room = Room::new();
    let (addr, _stop) = start(room.clone()).await;
    let mut a = connect(addr, &room, 1).await;
    let mut b = connect(addr, &room, 2).await;

    a.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(next_text(&mut b).await, "not json");
}

#[tokio::test]
async fn test_oversized_text_is_not_relayed() {
    let room = Room::new();
    let (addr, _stop) = start(room.clone()).await;
    let mut a = connect(addr, &room, 1).await;
    let mut b = connect(addr, &room, 2).await;

    let _ = a.send(Message::Text("x".repeat(MAX_TEXT_BYTES + 1))).await;
    assert!(nothing_arrives(&mut b).await);
}

#[tokio::test]
async fn test_disconnect_leaves_room() {
    let room = Room::new();
    let (addr, _stop) = start(room.clone()).await;
    let a = connect(addr, &room, 1).await;
    let _b = connect(addr, &room, 2).await;

    drop(a);
    timeout(Duration::from_secs(5), async {
        while room.len() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("member left");
}
