//! Bridge configuration. Logging can only be switched off in debug builds.

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use crate::utils::ice_url;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

#[cfg(debug_assertions)]
pub mod dev {
    // set to false to silence logging in debug builds
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![ServerConfig {
        id: "default-stun".into(),
        r#type: "stun".into(),
        url: DEFAULT_STUN_URL.into(),
        username: None,
        credential: None,
    }]
});

/// Connectivity settings for every peer connection the bridge opens.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<ServerConfig>,
}

fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_ICE_SERVERS.clone()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&raw)?;
        info!(
            "Loaded bridge config from {} with {} ICE servers",
            path.display(),
            config.ice_servers.len()
        );
        Ok(config)
    }

    /// Rejects empty URLs and TURN servers without credentials.
    pub fn validate(&self) -> Result<()> {
        if self.ice_servers.is_empty() {
            return Err(Error::Config("at least one ICE server is required".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!(
                    "server {} has an empty URL",
                    server.id
                )));
            }
            let relay = matches!(server.r#type.as_str(), "turn" | "turns");
            if relay && (server.username.is_none() || server.credential.is_none()) {
                return Err(Error::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|config| RTCIceServer {
                    urls: vec![ice_url(config)],
                    username: config.username.clone().unwrap_or_default(),
                    credential: config.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}
