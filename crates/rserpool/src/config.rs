// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ASAP instance configuration.
//!
//! All timeouts are in microseconds, matching the option names applications
//! pass in (`registrarResponseTimeout` etc.).

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
#[cfg(feature = "config-files")]
use std::path::Path;
use std::time::Duration;

use crate::error::RspError;
use crate::message::constants::{ASAP_PORT, DEFAULT_ANNOUNCE_GROUP, MAX_TRANSPORT_ADDRESSES};
use crate::registrar::HuntSettings;
use crate::types::TransportAddressBlock;

/// ASAP instance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsapConfig {
    /// Transmission trials per request before giving up.
    #[serde(default = "default_request_max_trials")]
    pub registrar_request_max_trials: u32,

    /// Bound on a single request transmission (µs).
    #[serde(default = "default_timeout_us")]
    pub registrar_request_timeout_us: u64,

    /// Time to wait for a registrar response (µs).
    #[serde(default = "default_timeout_us")]
    pub registrar_response_timeout_us: u64,

    /// Registrar hunt rounds before `NoRegistrar`.
    #[serde(default = "default_connect_max_trials")]
    pub registrar_connect_max_trials: u32,

    /// Bound on one connection attempt (µs).
    #[serde(default = "default_timeout_us")]
    pub registrar_connect_timeout_us: u64,

    /// Silence after which an announced registrar is forgotten (µs).
    #[serde(default = "default_announce_timeout_us")]
    pub registrar_announce_timeout_us: u64,

    /// Simultaneous connection attempts during a hunt.
    #[serde(default = "default_hunt_parallelism")]
    pub registrar_hunt_parallelism: usize,

    /// Listen for multicast registrar announces.
    #[serde(default = "default_true")]
    pub enable_auto_config: bool,

    /// Announce group and port.
    #[serde(default = "default_announce_address")]
    pub registrar_announce_address: SocketAddr,

    /// Statically known registrars, each `"addr:port[,addr:port...]"`.
    #[serde(default)]
    pub static_registrars: Vec<String>,

    /// Accept inbound registrar connections (registrar hand-off) on this address.
    #[serde(default)]
    pub asap_listen_address: Option<SocketAddr>,
}

fn default_request_max_trials() -> u32 {
    2
}

fn default_timeout_us() -> u64 {
    2_000_000
}

fn default_connect_max_trials() -> u32 {
    3
}

fn default_announce_timeout_us() -> u64 {
    5_000_000
}

fn default_hunt_parallelism() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_announce_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::from(DEFAULT_ANNOUNCE_GROUP)), ASAP_PORT)
}

impl Default for AsapConfig {
    fn default() -> Self {
        Self {
            registrar_request_max_trials: default_request_max_trials(),
            registrar_request_timeout_us: default_timeout_us(),
            registrar_response_timeout_us: default_timeout_us(),
            registrar_connect_max_trials: default_connect_max_trials(),
            registrar_connect_timeout_us: default_timeout_us(),
            registrar_announce_timeout_us: default_announce_timeout_us(),
            registrar_hunt_parallelism: default_hunt_parallelism(),
            enable_auto_config: true,
            registrar_announce_address: default_announce_address(),
            static_registrars: Vec::new(),
            asap_listen_address: None,
        }
    }
}

impl AsapConfig {
    /// Load configuration from a JSON file.
    #[cfg(feature = "config-files")]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    #[cfg(feature = "config-files")]
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Build a configuration from `(option, value)` pairs.
    ///
    /// Unset options keep their defaults; `registrar` may be repeated.
    pub fn from_options(options: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (key, value) in options {
            match *key {
                "registrarRequestMaxTrials" => {
                    config.registrar_request_max_trials = parse_value(key, value)?
                }
                "registrarRequestTimeout" => {
                    config.registrar_request_timeout_us = parse_value(key, value)?
                }
                "registrarResponseTimeout" => {
                    config.registrar_response_timeout_us = parse_value(key, value)?
                }
                "registrarConnectMaxTrials" => {
                    config.registrar_connect_max_trials = parse_value(key, value)?
                }
                "registrarConnectTimeout" => {
                    config.registrar_connect_timeout_us = parse_value(key, value)?
                }
                "registrarAnnounceTimeout" => {
                    config.registrar_announce_timeout_us = parse_value(key, value)?
                }
                "registrarHuntParallelism" => {
                    config.registrar_hunt_parallelism = parse_value(key, value)?
                }
                "enableAutoConfig" => config.enable_auto_config = parse_bool(key, value)?,
                "registrarAnnounceAddress" => {
                    config.registrar_announce_address = parse_value(key, value)?
                }
                "registrar" => {
                    parse_registrar(value)?;
                    config.static_registrars.push((*value).to_string());
                }
                "asapListenAddress" => config.asap_listen_address = Some(parse_value(key, value)?),
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "unknown option '{}'",
                        other
                    )))
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    // Builders

    pub fn with_static_registrar(mut self, registrar: impl Into<String>) -> Self {
        self.static_registrars.push(registrar.into());
        self
    }

    pub fn with_auto_config(mut self, enabled: bool) -> Self {
        self.enable_auto_config = enabled;
        self
    }

    pub fn with_response_timeout_us(mut self, timeout_us: u64) -> Self {
        self.registrar_response_timeout_us = timeout_us;
        self
    }

    pub fn with_request_max_trials(mut self, trials: u32) -> Self {
        self.registrar_request_max_trials = trials;
        self
    }

    pub fn with_connect_timeout_us(mut self, timeout_us: u64) -> Self {
        self.registrar_connect_timeout_us = timeout_us;
        self
    }

    pub fn with_connect_max_trials(mut self, trials: u32) -> Self {
        self.registrar_connect_max_trials = trials;
        self
    }

    pub fn with_listen_address(mut self, addr: SocketAddr) -> Self {
        self.asap_listen_address = Some(addr);
        self
    }

    // Derived values

    pub fn response_timeout(&self) -> Duration {
        Duration::from_micros(self.registrar_response_timeout_us)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_micros(self.registrar_connect_timeout_us)
    }

    pub fn hunt_settings(&self) -> HuntSettings {
        HuntSettings {
            connect_max_trials: self.registrar_connect_max_trials,
            connect_timeout: self.connect_timeout(),
            parallelism: self.registrar_hunt_parallelism,
        }
    }

    /// Parsed static registrar transports.
    pub fn static_registrar_blocks(&self) -> Result<Vec<TransportAddressBlock>, ConfigError> {
        self.static_registrars
            .iter()
            .map(|s| parse_registrar(s))
            .collect()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registrar_request_max_trials == 0 {
            return Err(ConfigError::InvalidValue(
                "registrar_request_max_trials cannot be 0".into(),
            ));
        }
        if self.registrar_connect_max_trials == 0 {
            return Err(ConfigError::InvalidValue(
                "registrar_connect_max_trials cannot be 0".into(),
            ));
        }
        if self.registrar_response_timeout_us == 0 || self.registrar_connect_timeout_us == 0 {
            return Err(ConfigError::InvalidValue(
                "registrar timeouts cannot be 0".into(),
            ));
        }
        if self.registrar_hunt_parallelism == 0 {
            return Err(ConfigError::InvalidValue(
                "registrar_hunt_parallelism cannot be 0".into(),
            ));
        }
        if self.enable_auto_config && !self.registrar_announce_address.ip().is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "registrar_announce_address {} is not a multicast address",
                self.registrar_announce_address
            )));
        }
        self.static_registrar_blocks()?;
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{}: cannot parse '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "{}: expected boolean, got '{}'",
            key, value
        ))),
    }
}

/// Parse `"addr:port[,addr:port...]"` into one multi-homed TCP block.
pub fn parse_registrar(s: &str) -> Result<TransportAddressBlock, ConfigError> {
    let addrs: Vec<SocketAddr> = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidValue(format!("bad registrar address '{}'", part)))
        })
        .collect::<Result<_, _>>()?;
    let Some(first) = addrs.first() else {
        return Err(ConfigError::InvalidValue("empty registrar address".into()));
    };
    if addrs.iter().any(|a| a.port() != first.port()) {
        return Err(ConfigError::InvalidValue(format!(
            "registrar '{}' mixes ports",
            s
        )));
    }
    if addrs.len() > MAX_TRANSPORT_ADDRESSES {
        return Err(ConfigError::InvalidValue(format!(
            "registrar '{}' has more than {} addresses",
            s, MAX_TRANSPORT_ADDRESSES
        )));
    }
    let mut block = TransportAddressBlock::tcp(*first);
    block.addresses = addrs.iter().map(|a| a.ip()).collect();
    Ok(block)
}

/// Configuration error types.
#[derive(Debug, Clone, PartialEq, Eq)]
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

impl From<ConfigError> for RspError {
    fn from(e: ConfigError) -> Self {
        RspError::Config(e.to_string())
    }
}
