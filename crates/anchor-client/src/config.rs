use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AnchorError;

pub const DEFAULT_ASSET_CODE: &str = "USDC";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

pub const ENV_HOME_DOMAIN: &str = "ANCHOR_HOME_DOMAIN";
pub const ENV_TRANSFER_SERVER: &str = "ANCHOR_TRANSFER_SERVER";
pub const ENV_NETWORK: &str = "ANCHOR_NETWORK";
pub const ENV_ASSET_CODE: &str = "ANCHOR_ASSET_CODE";
pub const ENV_POLL_INTERVAL_MS: &str = "ANCHOR_POLL_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ANCHOR_REQUEST_TIMEOUT_MS";

const MIN_POLL_INTERVAL_MS: u64 = 10;
const MIN_REQUEST_TIMEOUT_MS: u64 = 250;

/// Stellar network a challenge is signed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    #[default]
    Testnet,
    Public,
}

impl Network {
    #[must_use]
    pub fn passphrase(self) -> &'static str {
        match self {
            Network::Testnet => "Test SDF Network ; September 2015",
            Network::Public => "Public Global Stellar Network ; September 2015",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AnchorError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "testnet" | "test" => Ok(Network::Testnet),
            "public" | "mainnet" | "pubnet" => Ok(Network::Public),
            other => Err(AnchorError::InvalidConfig(format!(
                "unknown network `{other}`"
            ))),
        }
    }
}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorClientConfig {
    pub home_domain: String,
    pub transfer_server: Option<String>,
    pub network: Network,
    pub asset_code: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl AnchorClientConfig {
    pub fn new(home_domain: &str) -> Result<Self, AnchorError> {
        Ok(Self {
            home_domain: normalize_base_url(home_domain)?,
            transfer_server: None,
            network: Network::default(),
            asset_code: DEFAULT_ASSET_CODE.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        })
    }

    pub fn from_layer(layer: ConfigLayer) -> Result<Self, AnchorError> {
        let home_domain = layer
            .home_domain
            .ok_or_else(|| AnchorError::InvalidConfig("home_domain is required".to_string()))?;
        let mut config = Self::new(&home_domain)?;

        if let Some(transfer_server) = layer.transfer_server {
            config.transfer_server = Some(normalize_base_url(&transfer_server)?);
        }
        if let Some(network) = layer.network {
            config.network = network;
        }
        if let Some(asset_code) = layer.asset_code {
            let asset_code = asset_code.trim().to_ascii_uppercase();
            if asset_code.is_empty() {
                return Err(AnchorError::InvalidConfig(
                    "asset_code must not be empty".to_string(),
                ));
            }
            config.asset_code = asset_code;
        }
        if let Some(ms) = layer.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms.max(MIN_POLL_INTERVAL_MS));
        }
        if let Some(ms) = layer.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms.max(MIN_REQUEST_TIMEOUT_MS));
        }
        Ok(config)
    }

    /// Base URL for interactive endpoints when the descriptor names none.
    #[must_use]
    pub fn fallback_transfer_server(&self) -> &str {
        self.transfer_server
            .as_deref()
            .unwrap_or(self.home_domain.as_str())
    }
}

/// One partial configuration source. Layers are merged with
/// [`ConfigLayer::overlay`], the higher-precedence layer winning per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub home_domain: Option<String>,
    pub transfer_server: Option<String>,
    pub network: Option<Network>,
    pub asset_code: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl ConfigLayer {
    pub fn from_env() -> Result<Self, AnchorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AnchorError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let read_ms = |key: &str| -> Result<Option<u64>, AnchorError> {
            read(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|_| AnchorError::InvalidConfig(format!("{key} must be an integer")))
                })
                .transpose()
        };

        Ok(Self {
            home_domain: read(ENV_HOME_DOMAIN),
            transfer_server: read(ENV_TRANSFER_SERVER),
            network: read(ENV_NETWORK).as_deref().map(Network::parse).transpose()?,
            asset_code: read(ENV_ASSET_CODE),
            poll_interval_ms: read_ms(ENV_POLL_INTERVAL_MS)?,
            request_timeout_ms: read_ms(ENV_REQUEST_TIMEOUT_MS)?,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AnchorError> {
        toml::from_str(raw).map_err(|error| AnchorError::InvalidConfig(error.to_string()))
    }

    pub fn load_file(path: &Path) -> Result<Self, AnchorError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            AnchorError::InvalidConfig(format!("read {}: {error}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    #[must_use]
    pub fn overlay(self, higher: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            home_domain: higher.home_domain.or(self.home_domain),
            transfer_server: higher.transfer_server.or(self.transfer_server),
            network: higher.network.or(self.network),
            asset_code: higher.asset_code.or(self.asset_code),
            poll_interval_ms: higher.poll_interval_ms.or(self.poll_interval_ms),
            request_timeout_ms: higher.request_timeout_ms.or(self.request_timeout_ms),
        }
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, AnchorError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AnchorError::InvalidConfig(
            "base url must not be empty".to_string(),
        ));
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(AnchorError::InvalidConfig(format!(
            "base url `{trimmed}` must use http:// or https://"
        )));
    };
    if !matches!(scheme, "http" | "https") {
        return Err(AnchorError::InvalidConfig(format!(
            "base url `{trimmed}` must use http:// or https://"
        )));
    }
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(AnchorError::InvalidConfig(format!(
            "base url `{trimmed}` must include a host"
        )));
    }
    Ok(trimmed.to_string())
}
