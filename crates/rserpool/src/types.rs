// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identity and addressing types shared by the codec, the handlespace and the engine.

use crate::error::{Result, RspError};
use crate::message::constants::{MAX_POOL_HANDLE_SIZE, MAX_TRANSPORT_ADDRESSES};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Pool element identifier (unique within one pool).
pub type PoolElementIdentifier = u32;

/// Registrar (ENRP server) identifier.
pub type RegistrarIdentifier = u32;

/// Pool handle: opaque pool name compared byte-wise.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolHandle(Vec<u8>);

impl PoolHandle {
    /// Create a pool handle, rejecting empty or oversized names.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_POOL_HANDLE_SIZE {
            return Err(RspError::InvalidPoolHandle);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for PoolHandle {
    type Error = RspError;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s.as_bytes())
    }
}

impl TryFrom<&[u8]> for PoolHandle {
    type Error = RspError;

    fn try_from(b: &[u8]) -> Result<Self> {
        Self::new(b)
    }
}

impl fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolHandle(\"{}\")", self)
    }
}

/// Transport protocol of an address block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportProtocol {
    Sctp,
    Tcp,
    Udp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sctp => write!(f, "sctp"),
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Whether the transport carries only data or data plus control channel traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportUse {
    #[default]
    DataOnly,
    DataPlusControl,
}

/// A transport endpoint: protocol, port and one or more addresses (multi-homing).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportAddressBlock {
    pub protocol: TransportProtocol,
    pub port: u16,
    pub transport_use: TransportUse,
    pub addresses: Vec<IpAddr>,
}

impl TransportAddressBlock {
    /// Create an address block.
    pub fn new(protocol: TransportProtocol, port: u16, addresses: Vec<IpAddr>) -> Result<Self> {
        if addresses.is_empty() || addresses.len() > MAX_TRANSPORT_ADDRESSES {
            return Err(RspError::Config(format!(
                "transport address block needs 1..={} addresses",
                MAX_TRANSPORT_ADDRESSES
            )));
        }
        Ok(Self {
            protocol,
            port,
            transport_use: TransportUse::DataOnly,
            addresses,
        })
    }

    /// Single-address TCP block.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            protocol: TransportProtocol::Tcp,
            port: addr.port(),
            transport_use: TransportUse::DataOnly,
            addresses: vec![addr.ip()],
        }
    }

    /// Builder: set the transport use.
    pub fn with_use(mut self, transport_use: TransportUse) -> Self {
        self.transport_use = transport_use;
        self
    }

    /// All addresses as socket addresses.
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        self.addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect()
    }

    /// Whether the two blocks share at least one address on the same port and protocol.
    pub fn overlaps(&self, other: &TransportAddressBlock) -> bool {
        self.protocol == other.protocol
            && self.port == other.port
            && self.addresses.iter().any(|a| other.addresses.contains(a))
    }
}

impl fmt::Display for TransportAddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{{", self.protocol)?;
        for (i, a) in self.addresses.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, "}}:{}", self.port)
    }
}
