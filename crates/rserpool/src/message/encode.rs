// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message encoding.
//!
//! Encoding is deterministic: the same message always yields the same bytes.

use super::constants::*;
use super::{
    EncodeError, EnrpHeader, HandleUpdateAction, OperationError, PoolElementParameter,
    RserpoolMessage, ServerInformation,
};
use crate::policy::PolicySettings;
use crate::types::{PoolHandle, TransportAddressBlock, TransportProtocol, TransportUse};
use std::net::IpAddr;

/// Growable big-endian writer with TLV length back-patching.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(128),
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    /// Write a TLV header with a placeholder length; returns its offset.
    fn begin(&mut self, param_type: u16) -> usize {
        let start = self.buf.len();
        self.u16(param_type);
        self.u16(0);
        start
    }

    /// Patch the length of the TLV started at `start`, then pad to 4 bytes.
    fn end(&mut self, start: usize) -> Result<(), EncodeError> {
        let len = self.buf.len() - start;
        let len16 = u16::try_from(len).map_err(|_| EncodeError::MessageTooLarge(len))?;
        self.buf[start + 2..start + 4].copy_from_slice(&len16.to_be_bytes());
        self.pad();
        Ok(())
    }

    fn pad(&mut self) {
        let target = padded(self.buf.len());
        self.buf.resize(target, 0);
    }
}

/// Encode a message into a freshly allocated buffer.
///
/// # Errors
/// - `EncodeError::MessageTooLarge` if the result exceeds [`MAX_MESSAGE_SIZE`].
/// - `EncodeError::TooManyItems` if an array exceeds its protocol maximum.
/// - `EncodeError::InvalidAddressBlock` for an empty or oversized address block.
pub fn encode(msg: &RserpoolMessage) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    w.u8((msg.message_type() & 0x00ff) as u8);
    w.u8(flags_of(msg));
    w.u16(0);

    match msg {
        RserpoolMessage::Registration {
            pool_handle,
            pool_element,
        } => {
            put_pool_handle(&mut w, pool_handle)?;
            put_pool_element(&mut w, pool_element)?;
        }
        RserpoolMessage::RegistrationResponse {
            pool_handle,
            identifier,
            error,
        }
        | RserpoolMessage::DeregistrationResponse {
            pool_handle,
            identifier,
            error,
        } => {
            put_pool_handle(&mut w, pool_handle)?;
            put_identifier(&mut w, *identifier)?;
            if let Some(error) = error {
                put_operation_error(&mut w, error)?;
            }
        }
        RserpoolMessage::Deregistration {
            pool_handle,
            identifier,
        }
        | RserpoolMessage::EndpointKeepAliveAck {
            pool_handle,
            identifier,
        }
        | RserpoolMessage::EndpointUnreachable {
            pool_handle,
            identifier,
        } => {
            put_pool_handle(&mut w, pool_handle)?;
            put_identifier(&mut w, *identifier)?;
        }
        RserpoolMessage::HandleResolution { pool_handle, items } => {
            put_pool_handle(&mut w, pool_handle)?;
            if let Some(items) = items {
                let start = w.begin(ATT_HANDLE_RESOLUTION);
                w.u32(*items);
                w.end(start)?;
            }
        }
        RserpoolMessage::HandleResolutionResponse {
            pool_handle,
            policy,
            elements,
            error,
        } => {
            check_count("pool elements", elements.len(), MAX_MAX_HANDLE_RESOLUTION_ITEMS)?;
            put_pool_handle(&mut w, pool_handle)?;
            if let Some(policy) = policy {
                put_policy(&mut w, policy)?;
            }
            for element in elements {
                put_pool_element(&mut w, element)?;
            }
            if let Some(error) = error {
                put_operation_error(&mut w, error)?;
            }
        }
        RserpoolMessage::EndpointKeepAlive {
            registrar_identifier,
            pool_handle,
            identifier,
            ..
        } => {
            w.u32(*registrar_identifier);
            put_pool_handle(&mut w, pool_handle)?;
            if let Some(identifier) = identifier {
                put_identifier(&mut w, *identifier)?;
            }
        }
        RserpoolMessage::ServerAnnounce {
            registrar_identifier,
            transports,
        } => {
            check_count("transports", transports.len(), MAX_TRANSPORT_ADDRESSES)?;
            w.u32(*registrar_identifier);
            for transport in transports {
                put_transport(&mut w, transport)?;
            }
        }
        RserpoolMessage::Cookie { cookie } | RserpoolMessage::CookieEcho { cookie } => {
            put_cookie(&mut w, cookie)?;
        }
        RserpoolMessage::BusinessCard {
            pool_handle,
            elements,
        } => {
            check_count("pool elements", elements.len(), MAX_MAX_HANDLE_RESOLUTION_ITEMS)?;
            put_pool_handle(&mut w, pool_handle)?;
            for element in elements {
                put_pool_element(&mut w, element)?;
            }
        }
        RserpoolMessage::Error { error } => {
            put_operation_error(&mut w, error)?;
        }

        RserpoolMessage::Presence {
            header,
            checksum,
            server_information,
            ..
        } => {
            put_enrp_header(&mut w, header);
            let start = w.begin(ATT_POOL_ELEMENT_CHECKSUM);
            w.u16(*checksum);
            w.end(start)?;
            put_server_information(&mut w, server_information)?;
        }
        RserpoolMessage::HandleTableRequest { header, .. }
        | RserpoolMessage::ListRequest { header } => {
            put_enrp_header(&mut w, header);
        }
        RserpoolMessage::HandleTableResponse { header, pools, .. } => {
            check_count("pools", pools.len(), MAX_HANDLE_TABLE_POOLS)?;
            put_enrp_header(&mut w, header);
            for (pool_handle, elements) in pools {
                check_count(
                    "pool elements",
                    elements.len(),
                    MAX_MAX_HANDLE_RESOLUTION_ITEMS,
                )?;
                put_pool_handle(&mut w, pool_handle)?;
                for element in elements {
                    put_pool_element(&mut w, element)?;
                }
            }
        }
        RserpoolMessage::HandleUpdate {
            header,
            action,
            pool_handle,
            pool_element,
        } => {
            put_enrp_header(&mut w, header);
            w.u16(match action {
                HandleUpdateAction::AddPoolElement => PNUP_ADD_PE,
                HandleUpdateAction::DeletePoolElement => PNUP_DEL_PE,
            });
            w.u16(0);
            put_pool_handle(&mut w, pool_handle)?;
            put_pool_element(&mut w, pool_element)?;
        }
        RserpoolMessage::ListResponse {
            header, servers, ..
        } => {
            check_count("servers", servers.len(), MAX_SERVER_INFORMATION_ITEMS)?;
            put_enrp_header(&mut w, header);
            for server in servers {
                put_server_information(&mut w, server)?;
            }
        }
        RserpoolMessage::InitTakeover {
            header,
            target_server_identifier,
        }
        | RserpoolMessage::InitTakeoverAck {
            header,
            target_server_identifier,
        }
        | RserpoolMessage::TakeoverServer {
            header,
            target_server_identifier,
        } => {
            put_enrp_header(&mut w, header);
            w.u32(*target_server_identifier);
        }
        RserpoolMessage::EnrpError { header, error } => {
            put_enrp_header(&mut w, header);
            put_operation_error(&mut w, error)?;
        }
    }

    let total = w.buf.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(EncodeError::MessageTooLarge(total));
    }
    // Fits: MAX_MESSAGE_SIZE < u16::MAX.
    w.buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    Ok(w.buf)
}

fn flags_of(msg: &RserpoolMessage) -> u8 {
    let mut flags = 0u8;
    match msg {
        RserpoolMessage::RegistrationResponse { error, .. }
        | RserpoolMessage::DeregistrationResponse { error, .. } => {
            if error.is_some() {
                flags |= AHF_REJECT;
            }
        }
        RserpoolMessage::EndpointKeepAlive { home, .. } => {
            if *home {
                flags |= AHF_HOME;
            }
        }
        RserpoolMessage::Presence { reply_required, .. } => {
            if *reply_required {
                flags |= EHF_PRESENCE_REPLY_REQUIRED;
            }
        }
        RserpoolMessage::HandleTableRequest {
            own_children_only, ..
        } => {
            if *own_children_only {
                flags |= EHF_HANDLE_TABLE_REQUEST_OWN_CHILDREN_ONLY;
            }
        }
        RserpoolMessage::HandleTableResponse {
            more_to_send,
            reject,
            ..
        } => {
            if *reject {
                flags |= AHF_REJECT;
            }
            if *more_to_send {
                flags |= EHF_HANDLE_TABLE_RESPONSE_MORE_TO_SEND;
            }
        }
        RserpoolMessage::ListResponse { reject, .. } => {
            if *reject {
                flags |= AHF_REJECT;
            }
        }
        _ => {}
    }
    flags
}

fn check_count(what: &'static str, count: usize, max: usize) -> Result<(), EncodeError> {
    if count > max {
        return Err(EncodeError::TooManyItems { what, max });
    }
    Ok(())
}

fn put_enrp_header(w: &mut Writer, header: &EnrpHeader) {
    w.u32(header.sender_server_identifier);
    w.u32(header.receiver_server_identifier);
}

fn put_pool_handle(w: &mut Writer, pool_handle: &PoolHandle) -> Result<(), EncodeError> {
    let start = w.begin(ATT_POOL_HANDLE);
    w.bytes(pool_handle.as_bytes());
    w.end(start)
}

fn put_identifier(w: &mut Writer, identifier: u32) -> Result<(), EncodeError> {
    let start = w.begin(ATT_POOL_ELEMENT_IDENTIFIER);
    w.u32(identifier);
    w.end(start)
}

fn put_cookie(w: &mut Writer, cookie: &[u8]) -> Result<(), EncodeError> {
    if cookie.len() > MAX_OPAQUE_SIZE {
        return Err(EncodeError::MessageTooLarge(cookie.len()));
    }
    let start = w.begin(ATT_COOKIE);
    w.bytes(cookie);
    w.end(start)
}

fn put_operation_error(w: &mut Writer, error: &OperationError) -> Result<(), EncodeError> {
    if error.data.len() > MAX_OPAQUE_SIZE {
        return Err(EncodeError::MessageTooLarge(error.data.len()));
    }
    let start = w.begin(ATT_OPERATION_ERROR);
    w.u16(error.cause);
    // Bounded by MAX_OPAQUE_SIZE above.
    w.u16((4 + error.data.len()) as u16);
    w.bytes(&error.data);
    w.end(start)
}

fn put_address(w: &mut Writer, addr: &IpAddr) -> Result<(), EncodeError> {
    match addr {
        IpAddr::V4(v4) => {
            let start = w.begin(ATT_IPV4_ADDRESS);
            w.bytes(&v4.octets());
            w.end(start)
        }
        IpAddr::V6(v6) => {
            let start = w.begin(ATT_IPV6_ADDRESS);
            w.bytes(&v6.octets());
            w.end(start)
        }
    }
}

fn put_transport(w: &mut Writer, block: &TransportAddressBlock) -> Result<(), EncodeError> {
    if block.addresses.is_empty() || block.addresses.len() > MAX_TRANSPORT_ADDRESSES {
        return Err(EncodeError::InvalidAddressBlock);
    }
    let param_type = match block.protocol {
        TransportProtocol::Sctp => ATT_SCTP_TRANSPORT,
        TransportProtocol::Tcp => ATT_TCP_TRANSPORT,
        TransportProtocol::Udp => ATT_UDP_TRANSPORT,
    };
    let start = w.begin(param_type);
    w.u16(block.port);
    let transport_use = match (block.protocol, block.transport_use) {
        (TransportProtocol::Udp, _) => 0, // reserved
        (_, TransportUse::DataOnly) => UTP_DATA_ONLY,
        (_, TransportUse::DataPlusControl) => UTP_DATA_PLUS_CONTROL,
    };
    w.u16(transport_use);
    for addr in &block.addresses {
        put_address(w, addr)?;
    }
    w.end(start)
}

fn put_policy(w: &mut Writer, policy: &PolicySettings) -> Result<(), EncodeError> {
    let start = w.begin(ATT_POOL_POLICY);
    w.u32(policy.policy_type.code());
    for field in policy.fields() {
        w.u32(field);
    }
    w.end(start)
}

fn put_pool_element(w: &mut Writer, element: &PoolElementParameter) -> Result<(), EncodeError> {
    let start = w.begin(ATT_POOL_ELEMENT);
    w.u32(element.identifier);
    w.u32(element.home_registrar_identifier);
    w.u32(element.registration_life);
    put_transport(w, &element.user_transport)?;
    put_policy(w, &element.policy)?;
    if let Some(registrator) = &element.registrator_transport {
        put_transport(w, registrator)?;
    }
    w.end(start)
}

fn put_server_information(w: &mut Writer, info: &ServerInformation) -> Result<(), EncodeError> {
    let start = w.begin(ATT_SERVER_INFORMATION);
    w.u32(info.server_identifier);
    put_transport(w, &info.transport)?;
    w.end(start)
}
