use tracing::{debug, warn};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

use peercall_core::config::{BundlePolicy, GatheringPolicy, KeyType, RtcpMuxPolicy, TcpCandidatePolicy};
use peercall_core::RtcConfig;

pub fn rtc_configuration(config: &RtcConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        bundle_policy: match config.bundle_policy {
            BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
            BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
            BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
        },
        rtcp_mux_policy: match config.rtcp_mux_policy {
            RtcpMuxPolicy::Negotiate => RTCRtcpMuxPolicy::Negotiate,
            RtcpMuxPolicy::Require => RTCRtcpMuxPolicy::Require,
        },
        ..Default::default()
    }
}

/// ICE agent settings for the knobs `RTCConfiguration` does not carry.
pub fn setting_engine(config: &RtcConfig) -> SettingEngine {
    let mut settings = SettingEngine::default();
    match config.tcp_candidate_policy {
        TcpCandidatePolicy::Disabled => {
            settings.set_network_types(vec![NetworkType::Udp4, NetworkType::Udp6]);
        }
        TcpCandidatePolicy::Enabled => debug!("Using default candidate network types"),
    }
    if config.gathering_policy == GatheringPolicy::Once {
        // Trickle gathering runs until complete either way.
        debug!("Single gathering pass requested");
    }
    if config.key_type == KeyType::Rsa {
        warn!("RSA certificates are not generated, using ECDSA P-256");
    }
    settings
}
