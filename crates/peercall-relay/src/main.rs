#![forbid(unsafe_code)]

//! peercall relay binary.

use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use peercall_relay::Room;

#[derive(Parser, Debug)]
#[command(name = "peercall-relay")]
#[command(about = "Signaling relay - rebroadcasts websocket text to every other connected peer")]
struct Args {
    /// TCP listen address
    #[arg(long, env = "PEERCALL_RELAY_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Allow binding a non-loopback address
    #[arg(long, env = "PEERCALL_RELAY_ALLOW_PUBLIC_BIND", default_value_t = false)]
    allow_public_bind: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.listen.ip().is_loopback() && !args.allow_public_bind {
        return Err(anyhow!(
            "refusing non-loopback bind {} without --allow-public-bind",
            args.listen
        ));
    }

    peercall_common::init_tracing_with_default(&args.log_level);
    info!("Starting peercall-relay v{}", env!("CARGO_PKG_VERSION"));

    let listener = TcpListener::bind(args.listen).await?;
    peercall_relay::serve(listener, Room::new(), async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await
}
