use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Discriminant of a [`SignalingMessage`], as carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
}

impl MessageKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offer" => Ok(MessageKind::Offer),
            "answer" => Ok(MessageKind::Answer),
            "candidate" => Ok(MessageKind::Candidate),
            other => Err(Error::protocol(format!("unknown message type {other:?}"))),
        }
    }
}

/// A connectivity candidate as exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Media stream identification tag of the m-section the candidate belongs to.
    pub sdp_mid: String,
    /// Index of that m-section in the session description.
    pub sdp_mline_index: u16,
    /// The `candidate:...` descriptor line.
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            candidate: candidate.into(),
        }
    }
}

/// Message relayed over the signaling channel between the two endpoints.
///
/// On the wire this is a flat JSON object:
/// `{ "type": "offer"|"answer"|"candidate", "sdp": ..., "sdpMid": ..., "sdpMLineIndex": ... }`.
/// For candidates `sdp` carries the candidate descriptor. Parsing enforces that
/// offers and answers have a non-empty `sdp` and that candidates carry both
/// `sdpMid` and `sdpMLineIndex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum SignalingMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(IceCandidate),
}

impl SignalingMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalingMessage::Offer { sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalingMessage::Answer { sdp: sdp.into() }
    }

    pub fn candidate(candidate: IceCandidate) -> Self {
        SignalingMessage::Candidate(candidate)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SignalingMessage::Offer { .. } => MessageKind::Offer,
            SignalingMessage::Answer { .. } => MessageKind::Answer,
            SignalingMessage::Candidate(_) => MessageKind::Candidate,
        }
    }

    /// Description body, or the candidate descriptor for candidates.
    pub fn sdp(&self) -> &str {
        match self {
            SignalingMessage::Offer { sdp } | SignalingMessage::Answer { sdp } => sdp,
            SignalingMessage::Candidate(c) => &c.candidate,
        }
    }

    pub fn candidate_mid(&self) -> Option<&str> {
        match self {
            SignalingMessage::Candidate(c) => Some(&c.sdp_mid),
            _ => None,
        }
    }

    pub fn candidate_line_index(&self) -> Option<u16> {
        match self {
            SignalingMessage::Candidate(c) => Some(c.sdp_mline_index),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sdp: String,
    #[serde(rename = "sdpMid", default)]
    sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    sdp_mline_index: Option<u16>,
}

impl TryFrom<WireMessage> for SignalingMessage {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        match wire.kind.parse::<MessageKind>()? {
            MessageKind::Offer | MessageKind::Answer if wire.sdp.trim().is_empty() => Err(
                Error::protocol(format!("{} without a session description", wire.kind)),
            ),
            MessageKind::Offer => Ok(SignalingMessage::Offer { sdp: wire.sdp }),
            MessageKind::Answer => Ok(SignalingMessage::Answer { sdp: wire.sdp }),
            MessageKind::Candidate => {
                let sdp_mid = wire
                    .sdp_mid
                    .ok_or_else(|| Error::protocol("candidate without sdpMid"))?;
                let sdp_mline_index = wire
                    .sdp_mline_index
                    .ok_or_else(|| Error::protocol("candidate without sdpMLineIndex"))?;
                Ok(SignalingMessage::Candidate(IceCandidate {
                    sdp_mid,
                    sdp_mline_index,
                    candidate: wire.sdp,
                }))
            }
        }
    }
}

impl From<SignalingMessage> for WireMessage {
    fn from(msg: SignalingMessage) -> Self {
        let kind = msg.kind().as_str().to_string();
        match msg {
            SignalingMessage::Offer { sdp } | SignalingMessage::Answer { sdp } => WireMessage {
                kind,
                sdp,
                sdp_mid: None,
                sdp_mline_index: None,
            },
            SignalingMessage::Candidate(c) => WireMessage {
                kind,
                sdp: c.candidate,
                sdp_mid: Some(c.sdp_mid),
                sdp_mline_index: Some(c.sdp_mline_index),
            },
        }
    }
}
