use serde::{Deserialize, Serialize};

use peercall_common::{Error, Result};
use peercall_media::CaptureFormat;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "backcontrol";
pub const DEFAULT_STREAM_ID: &str = "RemoteSupport";
pub const DEFAULT_AUDIO_TRACK_ID: &str = "camera-audio";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TcpCandidatePolicy {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    MaxBundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtcpMuxPolicy {
    Negotiate,
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatheringPolicy {
    Once,
    Continually,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Rsa,
    Ecdsa,
}

/// Discovery and transport settings every connectivity engine is built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
    pub tcp_candidate_policy: TcpCandidatePolicy,
    pub bundle_policy: BundlePolicy,
    pub rtcp_mux_policy: RtcpMuxPolicy,
    pub gathering_policy: GatheringPolicy,
    pub key_type: KeyType,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::new(DEFAULT_STUN_SERVER)],
            // TCP candidates only help against servers speaking ICE-TCP.
            tcp_candidate_policy: TcpCandidatePolicy::Enabled,
            bundle_policy: BundlePolicy::MaxBundle,
            rtcp_mux_policy: RtcpMuxPolicy::Require,
            gathering_policy: GatheringPolicy::Continually,
            key_type: KeyType::Ecdsa,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub rtc: RtcConfig,
    pub capture: CaptureFormat,
    pub data_channel_label: String,
    pub stream_id: String,
    pub audio_track_id: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            rtc: RtcConfig::default(),
            capture: CaptureFormat::default(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            stream_id: DEFAULT_STREAM_ID.to_string(),
            audio_track_id: DEFAULT_AUDIO_TRACK_ID.to_string(),
        }
    }
}

impl CallConfig {
    /// Replaces the ICE server list, one server per URL.
    pub fn with_ice_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rtc.ice_servers = urls.into_iter().map(IceServer::new).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_channel_label.trim().is_empty() {
            return Err(Error::config("data channel label must not be empty"));
        }
        if self.stream_id.trim().is_empty() || self.audio_track_id.trim().is_empty() {
            return Err(Error::config("stream and audio track ids must not be empty"));
        }
        if self.capture.fps == 0 {
            return Err(Error::config("capture fps must be positive"));
        }
        for server in &self.rtc.ice_servers {
            for url in &server.urls {
                let scheme_ok = ["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !scheme_ok {
                    return Err(Error::config(format!("unsupported ICE server url {url:?}")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CallConfig::default();
        config.validate().unwrap();
        assert_eq!(config.rtc.ice_servers[0].urls[0], DEFAULT_STUN_SERVER);
        assert_eq!(config.rtc.bundle_policy, BundlePolicy::MaxBundle);
        assert_eq!(config.data_channel_label, "backcontrol");
    }

    #[test]
    fn test_rejects_bad_ice_url() {
        let config = CallConfig::default().with_ice_urls(["http://example.com"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: CallConfig =
            serde_json::from_str(r#"{"data_channel_label":"control"}"#).unwrap();
        assert_eq!(config.data_channel_label, "control");
        assert_eq!(config.rtc, RtcConfig::default());
    }
}
