use super::errors::Error;
use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::Error as IOError;
use std::time::Duration;
use thiserror::Error as ThisError;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc_ice::udp_network::{EphemeralUDP, UDPNetwork};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_FEEDBACK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_BANDWIDTH: u64 = 1_000_000;
pub const CAST_ROLE: &'static str = "cast";
pub const DEFAULT_CAST_BANDWIDTH: u64 = 5_000_000;

const MIN_FEEDBACK_INTERVAL_MS: u64 = 100;

#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    IOError(#[from] IOError),
    #[error("config toml error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("rtc configuration json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Urls {
    One(String),
    Many(Vec<String>),
}

impl Default for Urls {
    fn default() -> Self {
        Urls::Many(Vec::new())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ICEServerConfig {
    #[serde(default)]
    urls: Urls,
    #[serde(default)]
    username: String,
    #[serde(default)]
    credential: String,
}

impl ICEServerConfig {
    fn to_ice_server(&self) -> RTCIceServer {
        let urls = match &self.urls {
            Urls::One(url) => vec![url.clone()],
            Urls::Many(urls) => urls.clone(),
        };
        RTCIceServer {
            urls,
            username: self.username.clone(),
            credential: self.credential.clone(),
            credential_type: RTCIceCredentialType::Unspecified,
        }
    }
}

// The browser-style blob handed to clients as `rtcConfiguration`.
#[derive(Clone, Debug, Default, Deserialize)]
struct RtcConfiguration {
    #[serde(rename = "iceServers", default)]
    ice_servers: Vec<ICEServerConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebRTCTimeoutsConfig {
    #[serde(rename = "disconnected", default)]
    ice_disconnected_timeout: u64,
    #[serde(rename = "failed", default)]
    ice_failed_timeout: u64,
    #[serde(rename = "keepalive", default)]
    ice_keepalive_interval: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebRTCConfig {
    #[serde(rename = "portrange", default)]
    pub ice_port_range: Option<Vec<u16>>,
    #[serde(rename = "iceservers", default)]
    ice_servers: Vec<ICEServerConfig>,
    #[serde(rename = "nat1to1ips", default)]
    nat1_to_1ips: Option<Vec<String>>,
    #[serde(default)]
    timeouts: WebRTCTimeoutsConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    #[serde(rename = "queuecapacity")]
    pub queue_capacity: usize,
    #[serde(rename = "feedbackinterval")]
    pub feedback_interval_ms: u64,
    #[serde(rename = "maxbandwidth")]
    pub max_bandwidth: u64,
    // role name -> maximum bandwidth hint for peers joining with that role
    #[serde(rename = "roles")]
    pub roles: HashMap<String, u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let mut roles = HashMap::new();
        roles.insert(String::from(CAST_ROLE), DEFAULT_CAST_BANDWIDTH);
        RelayConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            feedback_interval_ms: DEFAULT_FEEDBACK_INTERVAL_MS,
            max_bandwidth: DEFAULT_MAX_BANDWIDTH,
            roles,
        }
    }
}

impl RelayConfig {
    pub fn feedback_interval(&self) -> Duration {
        Duration::from_millis(self.feedback_interval_ms.max(MIN_FEEDBACK_INTERVAL_MS))
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn bandwidth_for_role(&self, role: &str) -> u64 {
        self.roles
            .get(role)
            .copied()
            .unwrap_or(self.max_bandwidth)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub webrtc: WebRTCConfig,
}

pub fn load(cfg_path: &str) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(cfg_path)?;
    let decoded_config = toml::from_str(&content[..])?;
    Ok(decoded_config)
}

impl Config {
    /// Appends the ice servers of a browser-style `RTCConfiguration` json blob.
    pub fn with_rtc_configuration(mut self, blob: &str) -> Result<Self, ConfigError> {
        let rtc: RtcConfiguration = serde_json::from_str(blob)?;
        self.webrtc.ice_servers.extend(rtc.ice_servers);
        Ok(self)
    }
}

impl WebRTCConfig {
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(ICEServerConfig::to_ice_server)
            .collect()
    }

    pub fn setting_engine(&self) -> Result<SettingEngine> {
        let mut se = SettingEngine::default();

        if let Some(ice_port_range) = &self.ice_port_range {
            if ice_port_range.len() != 2 {
                return Err(Error::ErrPortRange.into());
            }
            let ephemeral_udp = EphemeralUDP::new(ice_port_range[0], ice_port_range[1])?;
            se.set_udp_network(UDPNetwork::Ephemeral(ephemeral_udp));
        }

        let timeouts = &self.timeouts;
        if timeouts.ice_disconnected_timeout != 0
            || timeouts.ice_failed_timeout != 0
            || timeouts.ice_keepalive_interval != 0
        {
            se.set_ice_timeouts(
                Some(Duration::from_secs(timeouts.ice_disconnected_timeout)),
                Some(Duration::from_secs(timeouts.ice_failed_timeout)),
                Some(Duration::from_secs(timeouts.ice_keepalive_interval)),
            );
        }

        if let Some(nat1to1ips) = &self.nat1_to_1ips {
            if !nat1to1ips.is_empty() {
                se.set_nat_1to1_ips(nat1to1ips.clone(), RTCIceCandidateType::Host);
            }
        }

        Ok(se)
    }
}
