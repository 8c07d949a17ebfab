// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registrar configuration.

use rserpool::message::constants::{ASAP_PORT, DEFAULT_ANNOUNCE_GROUP, MAX_MAX_HANDLE_RESOLUTION_ITEMS};
use rserpool::RegistrarIdentifier;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Registrar configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Registrar identifier (0 = pick a random one at startup)
    #[serde(default)]
    pub registrar_identifier: RegistrarIdentifier,

    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 3863)
    #[serde(default = "default_port")]
    pub port: u16,

    /// ASAP transport announced to pool users and elements.
    /// Unset: announces carry no address and receivers use the sender address.
    #[serde(default)]
    pub advertised_address: Option<SocketAddr>,

    /// Multicast group for SERVER_ANNOUNCE (default: 239.0.0.50:3863)
    #[serde(default = "default_announce_address")]
    pub announce_address: SocketAddr,

    /// Send SERVER_ANNOUNCE messages
    #[serde(default = "default_true")]
    pub announce_enabled: bool,

    /// Announce interval in milliseconds
    #[serde(default = "default_announce_interval")]
    pub announce_interval_ms: u64,

    /// Multicast TTL for announces
    #[serde(default = "default_announce_ttl")]
    pub announce_ttl: u32,

    /// Interval between ENDPOINT_KEEP_ALIVE messages to a pool element (milliseconds)
    #[serde(default = "default_keep_alive_transmission_interval")]
    pub keep_alive_transmission_interval_ms: u64,

    /// Time a pool element has to acknowledge a keep-alive (milliseconds)
    #[serde(default = "default_keep_alive_timeout")]
    pub keep_alive_timeout_ms: u64,

    /// ENDPOINT_UNREACHABLE reports after which a pool element is removed
    #[serde(default = "default_max_bad_pe_reports")]
    pub max_bad_pe_reports: u32,

    /// Elements returned when a handle resolution does not ask for a count
    #[serde(default = "default_handle_resolution_items")]
    pub default_handle_resolution_items: usize,

    /// Upper bound for elements in a handle resolution response
    #[serde(default = "default_max_handle_resolution_items")]
    pub max_handle_resolution_items: usize,

    /// Registration life granted at most (milliseconds)
    #[serde(default = "default_max_registration_life")]
    pub max_registration_life_ms: u32,

    /// Maximum framed message size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    ASAP_PORT
}

fn default_announce_address() -> SocketAddr {
    SocketAddr::from((DEFAULT_ANNOUNCE_GROUP, ASAP_PORT))
}

fn default_true() -> bool {
    true
}

fn default_announce_interval() -> u64 {
    1_000
}

fn default_announce_ttl() -> u32 {
    1
}

fn default_keep_alive_transmission_interval() -> u64 {
    5_000
}

fn default_keep_alive_timeout() -> u64 {
    5_000
}

fn default_max_bad_pe_reports() -> u32 {
    3
}

fn default_handle_resolution_items() -> usize {
    3
}

fn default_max_handle_resolution_items() -> usize {
    MAX_MAX_HANDLE_RESOLUTION_ITEMS
}

fn default_max_registration_life() -> u32 {
    300_000
}

fn default_max_message_size() -> usize {
    65536
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            registrar_identifier: 0,
            bind_address: default_bind_address(),
            port: default_port(),
            advertised_address: None,
            announce_address: default_announce_address(),
            announce_enabled: true,
            announce_interval_ms: default_announce_interval(),
            announce_ttl: default_announce_ttl(),
            keep_alive_transmission_interval_ms: default_keep_alive_transmission_interval(),
            keep_alive_timeout_ms: default_keep_alive_timeout(),
            max_bad_pe_reports: default_max_bad_pe_reports(),
            default_handle_resolution_items: default_handle_resolution_items(),
            max_handle_resolution_items: default_max_handle_resolution_items(),
            max_registration_life_ms: default_max_registration_life(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl RegistrarConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn keep_alive_transmission_interval_us(&self) -> u64 {
        self.keep_alive_transmission_interval_ms.saturating_mul(1000)
    }

    pub fn keep_alive_timeout_us(&self) -> u64 {
        self.keep_alive_timeout_ms.saturating_mul(1000)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.announce_enabled && self.announce_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "announce_interval_ms cannot be 0".into(),
            ));
        }
        if self.keep_alive_transmission_interval_ms == 0 || self.keep_alive_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "keep-alive intervals cannot be 0".into(),
            ));
        }
        if self.max_bad_pe_reports == 0 {
            return Err(ConfigError::InvalidValue(
                "max_bad_pe_reports cannot be 0".into(),
            ));
        }
        if self.max_handle_resolution_items == 0
            || self.max_handle_resolution_items > MAX_MAX_HANDLE_RESOLUTION_ITEMS
        {
            return Err(ConfigError::InvalidValue(format!(
                "max_handle_resolution_items must be within 1..={}",
                MAX_MAX_HANDLE_RESOLUTION_ITEMS
            )));
        }
        if self.default_handle_resolution_items == 0 {
            return Err(ConfigError::InvalidValue(
                "default_handle_resolution_items cannot be 0".into(),
            ));
        }
        if self.max_registration_life_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "max_registration_life_ms cannot be 0".into(),
            ));
        }
        if self.announce_enabled && !self.announce_address.ip().is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "announce_address {} is not a multicast address",
                self.announce_address
            )));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistrarConfig::default();
        assert_eq!(config.port, 3863);
        assert_eq!(config.announce_address, "239.0.0.50:3863".parse().unwrap());
        assert_eq!(config.max_handle_resolution_items, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RegistrarConfig =
            serde_json::from_str(r#"{"port": 9000, "max_bad_pe_reports": 5}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_bad_pe_reports, 5);
        assert_eq!(config.keep_alive_timeout_ms, 5_000);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registrar.json");
        let config = RegistrarConfig {
            registrar_identifier: 0x1234,
            announce_enabled: false,
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(RegistrarConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_unicast_announce() {
        let config = RegistrarConfig {
            announce_address: "10.0.0.1:3863".parse().unwrap(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RegistrarConfig {
            announce_enabled: false,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_item_bounds() {
        let config = RegistrarConfig {
            max_handle_resolution_items: 129,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keep_alive_durations() {
        let config = RegistrarConfig {
            keep_alive_transmission_interval_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.keep_alive_transmission_interval_us(), 250_000);
        assert_eq!(config.listen_address(), "0.0.0.0:3863".parse().unwrap());
    }
}
