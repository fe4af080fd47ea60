//! Call agents on top of real webrtc-rs peer connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use peercall_common::SignalingMessage;
use peercall_core::{
    CallAgent, CallConfig, CallDeps, CallHandle, ChannelTransport, Notice, SignalingTransport,
    Surfaces,
};
use peercall_media::{CaptureFormat, CaptureToken, DummyDevices, HeadlessSurface, Resolution};
use peercall_rtc::RtcBackend;

fn spawn_agent() -> (CallAgent, mpsc::UnboundedReceiver<SignalingMessage>) {
    let (transport, outbound) = ChannelTransport::new();
    let config = CallConfig {
        capture: CaptureFormat {
            resolution: Resolution {
                width: 32,
                height: 32,
            },
            fps: 5,
        },
        ..CallConfig::default()
    };
    // Host candidates only, no STUN round trips.
    let config = config.with_ice_urls(Vec::<String>::new());
    let agent = CallAgent::spawn(CallDeps {
        config,
        backend: Arc::new(RtcBackend::new().unwrap()),
        devices: Arc::new(DummyDevices::standard()),
        surfaces: Surfaces {
            local: Arc::new(HeadlessSurface::new("local")),
            remote_camera: Arc::new(HeadlessSurface::new("remote-camera")),
            remote_screen: Arc::new(HeadlessSurface::new("remote-screen")),
        },
        transport: Some(Arc::new(transport) as Arc<dyn SignalingTransport>),
    });
    agent
        .handle
        .set_screen_capture_projection_data(CaptureToken::new("projection"));
    (agent, outbound)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offer_carries_media_and_data_channel() {
    let (agent, mut outbound) = spawn_agent();
    agent.handle.call();

    let offer = timeout(Duration::from_secs(10), outbound.recv())
        .await
        .expect("offer in time")
        .expect("transport open");
    let SignalingMessage::Offer { sdp } = offer else {
        panic!("expected an offer, got {offer:?}");
    };
    assert!(sdp.contains("m=audio"));
    assert!(sdp.contains("m=video"));
    assert!(sdp.contains("m=application"));

    let snapshot = agent.handle.snapshot().await.unwrap();
    assert!(snapshot.has_data_channel);
    agent.handle.shutdown();
}

fn relay(mut from: mpsc::UnboundedReceiver<SignalingMessage>, to: CallHandle) {
    tokio::spawn(async move {
        while let Some(message) = from.recv().await {
            to.on_signaling_received(message);
        }
    });
}

async fn wait_for(notices: &mut mpsc::UnboundedReceiver<Notice>, wanted: Notice) {
    timeout(Duration::from_secs(20), async {
        while let Some(notice) = notices.recv().await {
            if notice == wanted {
                return;
            }
        }
        panic!("notices closed before {wanted:?}");
    })
    .await
    .expect("notice in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs a network interface usable for host candidates"]
async fn test_two_agents_connect_and_exchange_text() {
    let (mut caller, caller_out) = spawn_agent();
    let (mut callee, callee_out) = spawn_agent();
    relay(caller_out, callee.handle.clone());
    relay(callee_out, caller.handle.clone());

    caller.handle.call();
    wait_for(&mut caller.notices, Notice::Connected).await;
    wait_for(&mut callee.notices, Notice::Connected).await;

    caller.handle.send_data("ping");
    wait_for(&mut callee.notices, Notice::DataChannelText("ping".into())).await;

    caller.handle.hang();
    callee.handle.shutdown();
    caller.handle.shutdown();
}
