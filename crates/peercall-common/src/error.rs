//! Common error types for peercall.

use thiserror::Error;

/// Result type alias using peercall's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for peercall operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected signaling message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Capture device, render surface or media source failure
    #[error("media error: {0}")]
    Media(String),

    /// Connectivity engine rejected or failed an operation
    #[error("engine error: {0}")]
    Engine(String),

    /// Signaling transport unavailable or broken
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a media error from any displayable type.
    pub fn media(msg: impl std::fmt::Display) -> Self {
        Self::Media(msg.to_string())
    }

    /// Create an engine error from any displayable type.
    pub fn engine(msg: impl std::fmt::Display) -> Self {
        Self::Engine(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
