#![forbid(unsafe_code)]

//! WebRTC backend: every call attempt gets its own peer connection, driven
//! by a worker task on the runtime the backend was created on.

use anyhow::{anyhow, Result};
use tokio::runtime::Handle;

use peercall_core::{MediaBackend, MediaFactory};

mod channel;
pub mod config;
mod engine;
mod factory;
mod tracks;

pub use channel::RtcDataChannel;
pub use engine::RtcEngine;
pub use factory::RtcFactory;

#[derive(Clone)]
pub struct RtcBackend {
    runtime: Handle,
}

impl RtcBackend {
    /// Binds the backend to the current tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| anyhow!("webrtc backend needs a tokio runtime: {e}"))?;
        Ok(Self { runtime })
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl MediaBackend for RtcBackend {
    fn create_factory(&self) -> Result<Box<dyn MediaFactory>> {
        Ok(Box::new(RtcFactory::new(self.runtime.clone())))
    }
}
