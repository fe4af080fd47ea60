#![forbid(unsafe_code)]

//! peercall endpoint: joins a signaling relay and places or answers calls
//! driven by commands read from stdin.

mod command;
mod signaling;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use peercall_core::{
    CallAgent, CallConfig, CallDeps, CallHandle, ChannelTransport, Notice, SignalingTransport,
    Surfaces,
};
use peercall_media::{CaptureToken, DummyDevices, HeadlessSurface};
use peercall_rtc::RtcBackend;

use crate::command::{Command, HELP};

#[derive(Parser, Debug)]
#[command(name = "peercall")]
#[command(about = "Peer-to-peer call endpoint driven from stdin")]
struct Args {
    /// Websocket URL of the signaling relay
    #[arg(long, env = "PEERCALL_SIGNALING_URL", default_value = "ws://127.0.0.1:3000/ws")]
    signaling_url: String,

    /// ICE server URL, repeatable; defaults to a public STUN server
    #[arg(long = "ice-url", env = "PEERCALL_ICE_URLS", value_delimiter = ',')]
    ice_urls: Vec<String>,

    /// Label of the control data channel
    #[arg(long, env = "PEERCALL_DATA_CHANNEL_LABEL")]
    data_channel_label: Option<String>,

    /// Capture frame rate
    #[arg(long, env = "PEERCALL_FPS")]
    fps: Option<u16>,

    /// Grant capture permission at startup
    #[arg(long, env = "PEERCALL_AUTO_GRANT", default_value_t = false)]
    grant: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn call_config(&self) -> CallConfig {
        let mut config = CallConfig::default();
        if !self.ice_urls.is_empty() {
            config = config.with_ice_urls(self.ice_urls.iter().cloned());
        }
        if let Some(label) = &self.data_channel_label {
            config.data_channel_label = label.clone();
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    peercall_common::init_tracing_with_default(&args.log_level);
    info!("Starting peercall v{}", env!("CARGO_PKG_VERSION"));

    let config = args.call_config();
    config.validate()?;

    let (transport, outbound) = ChannelTransport::new();
    let CallAgent {
        handle,
        notices,
        task,
    } = CallAgent::spawn(CallDeps {
        config,
        backend: Arc::new(RtcBackend::new()?),
        devices: Arc::new(DummyDevices::standard()),
        surfaces: Surfaces {
            local: Arc::new(HeadlessSurface::new("local")),
            remote_camera: Arc::new(HeadlessSurface::new("remote-camera")),
            remote_screen: Arc::new(HeadlessSurface::new("remote-screen")),
        },
        transport: Some(Arc::new(transport) as Arc<dyn SignalingTransport>),
    });
    if args.grant {
        grant(&handle);
    }

    tokio::spawn(log_notices(notices));
    let mut signaling = tokio::spawn(signaling::run(
        args.signaling_url.clone(),
        handle.clone(),
        outbound,
    ));

    info!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            finished = &mut signaling => {
                match finished {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("Signaling stopped: {e:#}"),
                    Err(e) => error!("Signaling task failed: {e}"),
                }
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(&handle, command).await,
                    Err(e) => warn!("{e}; {HELP}"),
                }
            }
        }
    }

    handle.shutdown();
    signaling.abort();
    if let Err(e) = task.await {
        error!("Call agent task failed: {e}");
    }
    Ok(())
}

fn grant(handle: &CallHandle) {
    handle.set_screen_capture_projection_data(CaptureToken::new("peercall-cli"));
    info!("Capture permission granted");
}

async fn execute(handle: &CallHandle, command: Command) {
    match command {
        Command::Call => handle.call(),
        Command::Hang => handle.hang(),
        Command::Grant => grant(handle),
        Command::Decline => handle.decline_support_call(),
        Command::Send(text) => handle.send_data(text),
        Command::Status => match handle.snapshot().await {
            Ok(snapshot) => info!("{snapshot:?}"),
            Err(e) => warn!("No status available: {e}"),
        },
        Command::Help => info!("{HELP}"),
        Command::Quit => {}
    }
}

async fn log_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::PermissionRequired => warn!("Capture permission required, type `grant`"),
            Notice::IncomingCallNeedsPermission => {
                info!("Incoming call, type `grant` to answer or `decline`")
            }
            Notice::CalledWhileInCall => warn!("Called while in a call, previous call ended"),
            Notice::Connected => info!("Call connected"),
            Notice::Disconnected => info!("Call disconnected"),
            Notice::CallFailed(reason) => error!("Call failed: {reason}"),
            Notice::DataChannelText(text) => info!("Peer says: {text}"),
        }
    }
}
