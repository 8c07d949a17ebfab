// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSerPool wire message codec.
//!
//! Messages are a 4-byte header `{type u8, flags u8, length u16}` followed by
//! TLV parameters `{type u16, length u16, value, padding}`. All integers are
//! big-endian; every parameter is padded with zeros to a 4-byte boundary and
//! the parameter length never counts that padding.
//!
//! The ASAP and ENRP families share type octets, so [`decode`] takes the
//! payload protocol identifier the message arrived with.

pub mod constants;
mod decode;
mod encode;
mod parameter;


pub use decode::decode;
pub use encode::encode;
pub use parameter::{
    EnrpHeader, HandleUpdateAction, OperationError, PoolElementParameter, ServerInformation,
};

use crate::policy::PolicySettings;
use crate::types::{PoolElementIdentifier, PoolHandle, RegistrarIdentifier, TransportAddressBlock};
use constants::*;
use std::fmt;

/// Decoded ASAP or ENRP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RserpoolMessage {
    // ---------------------------------------------------------------- ASAP
    Registration {
        pool_handle: PoolHandle,
        pool_element: PoolElementParameter,
    },
    RegistrationResponse {
        pool_handle: PoolHandle,
        identifier: PoolElementIdentifier,
        /// Present (with the reject flag) when the registration failed.
        error: Option<OperationError>,
    },
    Deregistration {
        pool_handle: PoolHandle,
        identifier: PoolElementIdentifier,
    },
    DeregistrationResponse {
        pool_handle: PoolHandle,
        identifier: PoolElementIdentifier,
        error: Option<OperationError>,
    },
    HandleResolution {
        pool_handle: PoolHandle,
        /// Requested number of pool elements, if the user asks for one.
        items: Option<u32>,
    },
    HandleResolutionResponse {
        pool_handle: PoolHandle,
        policy: Option<PolicySettings>,
        elements: Vec<PoolElementParameter>,
        error: Option<OperationError>,
    },
    EndpointKeepAlive {
        registrar_identifier: RegistrarIdentifier,
        home: bool,
        pool_handle: PoolHandle,
        /// `None` addresses every pool element the receiver owns.
        identifier: Option<PoolElementIdentifier>,
    },
    EndpointKeepAliveAck {
        pool_handle: PoolHandle,
        identifier: PoolElementIdentifier,
    },
    EndpointUnreachable {
        pool_handle: PoolHandle,
        identifier: PoolElementIdentifier,
    },
    ServerAnnounce {
        registrar_identifier: RegistrarIdentifier,
        transports: Vec<TransportAddressBlock>,
    },
    Cookie {
        cookie: Vec<u8>,
    },
    CookieEcho {
        cookie: Vec<u8>,
    },
    BusinessCard {
        pool_handle: PoolHandle,
        elements: Vec<PoolElementParameter>,
    },
    Error {
        error: OperationError,
    },

    // ---------------------------------------------------------------- ENRP
    Presence {
        header: EnrpHeader,
        reply_required: bool,
        checksum: u16,
        server_information: ServerInformation,
    },
    HandleTableRequest {
        header: EnrpHeader,
        own_children_only: bool,
    },
    HandleTableResponse {
        header: EnrpHeader,
        more_to_send: bool,
        reject: bool,
        pools: Vec<(PoolHandle, Vec<PoolElementParameter>)>,
    },
    HandleUpdate {
        header: EnrpHeader,
        action: HandleUpdateAction,
        pool_handle: PoolHandle,
        pool_element: PoolElementParameter,
    },
    ListRequest {
        header: EnrpHeader,
    },
    ListResponse {
        header: EnrpHeader,
        reject: bool,
        servers: Vec<ServerInformation>,
    },
    InitTakeover {
        header: EnrpHeader,
        target_server_identifier: RegistrarIdentifier,
    },
    InitTakeoverAck {
        header: EnrpHeader,
        target_server_identifier: RegistrarIdentifier,
    },
    TakeoverServer {
        header: EnrpHeader,
        target_server_identifier: RegistrarIdentifier,
    },
    EnrpError {
        header: EnrpHeader,
        error: OperationError,
    },
}

impl RserpoolMessage {
    /// Internal 16-bit type tag (`AHT_*` / `EHT_*`).
    pub fn message_type(&self) -> u16 {
        match self {
            Self::Registration { .. } => AHT_REGISTRATION,
            Self::RegistrationResponse { .. } => AHT_REGISTRATION_RESPONSE,
            Self::Deregistration { .. } => AHT_DEREGISTRATION,
            Self::DeregistrationResponse { .. } => AHT_DEREGISTRATION_RESPONSE,
            Self::HandleResolution { .. } => AHT_HANDLE_RESOLUTION,
            Self::HandleResolutionResponse { .. } => AHT_HANDLE_RESOLUTION_RESPONSE,
            Self::EndpointKeepAlive { .. } => AHT_ENDPOINT_KEEP_ALIVE,
            Self::EndpointKeepAliveAck { .. } => AHT_ENDPOINT_KEEP_ALIVE_ACK,
            Self::EndpointUnreachable { .. } => AHT_ENDPOINT_UNREACHABLE,
            Self::ServerAnnounce { .. } => AHT_SERVER_ANNOUNCE,
            Self::Cookie { .. } => AHT_COOKIE,
            Self::CookieEcho { .. } => AHT_COOKIE_ECHO,
            Self::BusinessCard { .. } => AHT_BUSINESS_CARD,
            Self::Error { .. } => AHT_ERROR,
            Self::Presence { .. } => EHT_PRESENCE,
            Self::HandleTableRequest { .. } => EHT_HANDLE_TABLE_REQUEST,
            Self::HandleTableResponse { .. } => EHT_HANDLE_TABLE_RESPONSE,
            Self::HandleUpdate { .. } => EHT_HANDLE_UPDATE,
            Self::ListRequest { .. } => EHT_LIST_REQUEST,
            Self::ListResponse { .. } => EHT_LIST_RESPONSE,
            Self::InitTakeover { .. } => EHT_INIT_TAKEOVER,
            Self::InitTakeoverAck { .. } => EHT_INIT_TAKEOVER_ACK,
            Self::TakeoverServer { .. } => EHT_TAKEOVER_SERVER,
            Self::EnrpError { .. } => EHT_ERROR,
        }
    }

    /// Payload protocol identifier this message travels with.
    pub fn ppid(&self) -> u32 {
        if self.message_type() & 0xff00 == ENRP_FAMILY {
            PPID_ENRP
        } else {
            PPID_ASAP
        }
    }

    /// Pool handle the message refers to, if any.
    pub fn pool_handle(&self) -> Option<&PoolHandle> {
        match self {
            Self::Registration { pool_handle, .. }
            | Self::RegistrationResponse { pool_handle, .. }
            | Self::Deregistration { pool_handle, .. }
            | Self::DeregistrationResponse { pool_handle, .. }
            | Self::HandleResolution { pool_handle, .. }
            | Self::HandleResolutionResponse { pool_handle, .. }
            | Self::EndpointKeepAlive { pool_handle, .. }
            | Self::EndpointKeepAliveAck { pool_handle, .. }
            | Self::EndpointUnreachable { pool_handle, .. }
            | Self::BusinessCard { pool_handle, .. }
            | Self::HandleUpdate { pool_handle, .. } => Some(pool_handle),
            _ => None,
        }
    }
}

/// Human-readable message type name for logs.
pub fn message_type_name(message_type: u16) -> &'static str {
    match message_type {
        AHT_REGISTRATION => "REGISTRATION",
        AHT_DEREGISTRATION => "DEREGISTRATION",
        AHT_REGISTRATION_RESPONSE => "REGISTRATION_RESPONSE",
        AHT_DEREGISTRATION_RESPONSE => "DEREGISTRATION_RESPONSE",
        AHT_HANDLE_RESOLUTION => "HANDLE_RESOLUTION",
        AHT_HANDLE_RESOLUTION_RESPONSE => "HANDLE_RESOLUTION_RESPONSE",
        AHT_ENDPOINT_KEEP_ALIVE => "ENDPOINT_KEEP_ALIVE",
        AHT_ENDPOINT_KEEP_ALIVE_ACK => "ENDPOINT_KEEP_ALIVE_ACK",
        AHT_ENDPOINT_UNREACHABLE => "ENDPOINT_UNREACHABLE",
        AHT_SERVER_ANNOUNCE => "SERVER_ANNOUNCE",
        AHT_COOKIE => "COOKIE",
        AHT_COOKIE_ECHO => "COOKIE_ECHO",
        AHT_BUSINESS_CARD => "BUSINESS_CARD",
        AHT_ERROR => "ASAP_ERROR",
        EHT_PRESENCE => "PRESENCE",
        EHT_HANDLE_TABLE_REQUEST => "HANDLE_TABLE_REQUEST",
        EHT_HANDLE_TABLE_RESPONSE => "HANDLE_TABLE_RESPONSE",
        EHT_HANDLE_UPDATE => "HANDLE_UPDATE",
        EHT_LIST_REQUEST => "LIST_REQUEST",
        EHT_LIST_RESPONSE => "LIST_RESPONSE",
        EHT_INIT_TAKEOVER => "INIT_TAKEOVER",
        EHT_INIT_TAKEOVER_ACK => "INIT_TAKEOVER_ACK",
        EHT_TAKEOVER_SERVER => "TAKEOVER_SERVER",
        EHT_ERROR => "ENRP_ERROR",
        _ => "UNKNOWN",
    }
}

impl fmt::Display for RserpoolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(message_type_name(self.message_type()))?;
        if let Some(ph) = self.pool_handle() {
            write!(f, " [{}]", ph)?;
        }
        Ok(())
    }
}

/// Errors raised while decoding a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than a header or fixed field requires.
    Truncated,
    /// Length field disagrees with the bytes actually present.
    LengthMismatch { declared: usize, actual: usize },
    /// Payload protocol identifier is neither ASAP nor ENRP.
    UnknownPpid(u32),
    UnknownMessageType(u16),
    /// Unknown parameter whose action bits demand stopping.
    UnknownParameter(u16),
    MissingParameter(&'static str),
    TooManyItems { what: &'static str, max: usize },
    InvalidPolicy(u32),
    InvalidValue(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "Truncated message"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "Length mismatch: declared {} bytes, have {}", declared, actual)
            }
            Self::UnknownPpid(ppid) => write!(f, "Unknown payload protocol identifier {}", ppid),
            Self::UnknownMessageType(t) => write!(f, "Unknown message type 0x{:04x}", t),
            Self::UnknownParameter(t) => write!(f, "Unknown mandatory parameter 0x{:04x}", t),
            Self::MissingParameter(what) => write!(f, "Missing {} parameter", what),
            Self::TooManyItems { what, max } => write!(f, "Too many {} (max {})", what, max),
            Self::InvalidPolicy(code) => write!(f, "Invalid pool policy 0x{:08x}", code),
            Self::InvalidValue(what) => write!(f, "Invalid {}", what),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors raised while encoding a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Encoded size exceeds [`MAX_MESSAGE_SIZE`].
    MessageTooLarge(usize),
    TooManyItems { what: &'static str, max: usize },
    /// Transport address block without addresses or with too many.
    InvalidAddressBlock,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooLarge(size) => {
                write!(f, "Message too large: {} bytes (max {})", size, MAX_MESSAGE_SIZE)
            }
            Self::TooManyItems { what, max } => write!(f, "Too many {} (max {})", what, max),
            Self::InvalidAddressBlock => write!(f, "Invalid transport address block"),
        }
    }
}

impl std::error::Error for EncodeError {}
