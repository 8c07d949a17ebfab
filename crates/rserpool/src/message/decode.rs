// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message decoding.
//!
//! Unknown parameters are handled by their action bits: the two "stop" codes
//! abort the decode, the two "continue" codes skip the parameter.

use super::constants::*;
use super::{
    DecodeError, EnrpHeader, HandleUpdateAction, OperationError, PoolElementParameter,
    RserpoolMessage, ServerInformation,
};
use crate::policy::{PolicySettings, PolicyType};
use crate::types::{PoolHandle, TransportAddressBlock, TransportProtocol, TransportUse};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Bounds-checked big-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.data.len() - self.pos < n {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

/// One TLV parameter, value without header or padding.
#[derive(Debug, Clone, Copy)]
struct RawParameter<'a> {
    param_type: u16,
    value: &'a [u8],
}

fn is_known_parameter(param_type: u16) -> bool {
    matches!(
        param_type,
        ATT_IPV4_ADDRESS
            | ATT_IPV6_ADDRESS
            | ATT_SCTP_TRANSPORT
            | ATT_TCP_TRANSPORT
            | ATT_UDP_TRANSPORT
            | ATT_POOL_POLICY
            | ATT_POOL_HANDLE
            | ATT_POOL_ELEMENT
            | ATT_SERVER_INFORMATION
            | ATT_OPERATION_ERROR
            | ATT_COOKIE
            | ATT_POOL_ELEMENT_IDENTIFIER
            | ATT_POOL_ELEMENT_CHECKSUM
            | ATT_HANDLE_RESOLUTION
    )
}

/// Split a parameter sequence, dropping skippable unknown parameters.
fn parameters(body: &[u8]) -> Result<Vec<RawParameter<'_>>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < body.len() {
        if body.len() - pos < PARAMETER_HEADER_SIZE {
            return Err(DecodeError::Truncated);
        }
        let param_type = u16::from_be_bytes([body[pos], body[pos + 1]]);
        let length = usize::from(u16::from_be_bytes([body[pos + 2], body[pos + 3]]));
        if length < PARAMETER_HEADER_SIZE {
            return Err(DecodeError::LengthMismatch {
                declared: length,
                actual: PARAMETER_HEADER_SIZE,
            });
        }
        if length > body.len() - pos {
            return Err(DecodeError::LengthMismatch {
                declared: length,
                actual: body.len() - pos,
            });
        }
        let value = &body[pos + PARAMETER_HEADER_SIZE..pos + length];
        pos = (pos + padded(length)).min(body.len());

        if is_known_parameter(param_type) {
            out.push(RawParameter { param_type, value });
            continue;
        }
        match param_type & ATT_ACTION_MASK {
            ATT_ACTION_STOP | ATT_ACTION_STOP_AND_REPORT => {
                return Err(DecodeError::UnknownParameter(param_type));
            }
            _ => {
                log::debug!("[codec] skipping unknown parameter 0x{:04x}", param_type);
            }
        }
    }
    Ok(out)
}

fn find<'a>(params: &[RawParameter<'a>], param_type: u16) -> Option<&'a [u8]> {
    params
        .iter()
        .find(|p| p.param_type == param_type)
        .map(|p| p.value)
}

fn require<'a>(
    params: &[RawParameter<'a>],
    param_type: u16,
    what: &'static str,
) -> Result<&'a [u8], DecodeError> {
    find(params, param_type).ok_or(DecodeError::MissingParameter(what))
}

fn is_transport(param_type: u16) -> bool {
    matches!(
        param_type,
        ATT_SCTP_TRANSPORT | ATT_TCP_TRANSPORT | ATT_UDP_TRANSPORT
    )
}

/// Decode a message that arrived with payload protocol identifier `ppid`.
///
/// # Errors
/// Returns a [`DecodeError`] describing the first inconsistency found.
pub fn decode(bytes: &[u8], ppid: u32) -> Result<RserpoolMessage, DecodeError> {
    let family = match ppid {
        PPID_ASAP => ASAP_FAMILY,
        PPID_ENRP => ENRP_FAMILY,
        other => return Err(DecodeError::UnknownPpid(other)),
    };
    if bytes.len() < MESSAGE_HEADER_SIZE {
        return Err(DecodeError::Truncated);
    }
    let message_type = family | u16::from(bytes[0]);
    let flags = bytes[1];
    let length = usize::from(u16::from_be_bytes([bytes[2], bytes[3]]));
    if length < MESSAGE_HEADER_SIZE || length != bytes.len() {
        return Err(DecodeError::LengthMismatch {
            declared: length,
            actual: bytes.len(),
        });
    }

    let mut r = Reader::new(&bytes[MESSAGE_HEADER_SIZE..length]);
    let msg = match message_type {
        AHT_REGISTRATION => {
            let params = parameters(r.rest())?;
            RserpoolMessage::Registration {
                pool_handle: pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?,
                pool_element: pool_element(require(&params, ATT_POOL_ELEMENT, "pool element")?)?,
            }
        }
        AHT_REGISTRATION_RESPONSE | AHT_DEREGISTRATION_RESPONSE => {
            let params = parameters(r.rest())?;
            let pool_handle = pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?;
            let identifier = identifier(require(
                &params,
                ATT_POOL_ELEMENT_IDENTIFIER,
                "pool element identifier",
            )?)?;
            let error = match find(&params, ATT_OPERATION_ERROR) {
                Some(v) => Some(operation_error(v)?),
                None if flags & AHF_REJECT != 0 => Some(OperationError::unspecified()),
                None => None,
            };
            if message_type == AHT_REGISTRATION_RESPONSE {
                RserpoolMessage::RegistrationResponse {
                    pool_handle,
                    identifier,
                    error,
                }
            } else {
                RserpoolMessage::DeregistrationResponse {
                    pool_handle,
                    identifier,
                    error,
                }
            }
        }
        AHT_DEREGISTRATION | AHT_ENDPOINT_KEEP_ALIVE_ACK | AHT_ENDPOINT_UNREACHABLE => {
            let params = parameters(r.rest())?;
            let pool_handle = pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?;
            let identifier = identifier(require(
                &params,
                ATT_POOL_ELEMENT_IDENTIFIER,
                "pool element identifier",
            )?)?;
            match message_type {
                AHT_DEREGISTRATION => RserpoolMessage::Deregistration {
                    pool_handle,
                    identifier,
                },
                AHT_ENDPOINT_KEEP_ALIVE_ACK => RserpoolMessage::EndpointKeepAliveAck {
                    pool_handle,
                    identifier,
                },
                _ => RserpoolMessage::EndpointUnreachable {
                    pool_handle,
                    identifier,
                },
            }
        }
        AHT_HANDLE_RESOLUTION => {
            let params = parameters(r.rest())?;
            RserpoolMessage::HandleResolution {
                pool_handle: pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?,
                items: find(&params, ATT_HANDLE_RESOLUTION)
                    .map(|v| Reader::new(v).u32())
                    .transpose()?,
            }
        }
        AHT_HANDLE_RESOLUTION_RESPONSE => {
            let params = parameters(r.rest())?;
            let elements = pool_elements(&params)?;
            RserpoolMessage::HandleResolutionResponse {
                pool_handle: pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?,
                policy: find(&params, ATT_POOL_POLICY).map(policy).transpose()?,
                elements,
                error: find(&params, ATT_OPERATION_ERROR)
                    .map(operation_error)
                    .transpose()?,
            }
        }
        AHT_ENDPOINT_KEEP_ALIVE => {
            let registrar_identifier = r.u32()?;
            let params = parameters(r.rest())?;
            RserpoolMessage::EndpointKeepAlive {
                registrar_identifier,
                home: flags & AHF_HOME != 0,
                pool_handle: pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?,
                identifier: find(&params, ATT_POOL_ELEMENT_IDENTIFIER)
                    .map(identifier)
                    .transpose()?,
            }
        }
        AHT_SERVER_ANNOUNCE => {
            let registrar_identifier = r.u32()?;
            let params = parameters(r.rest())?;
            let transports = params
                .iter()
                .filter(|p| is_transport(p.param_type))
                .map(|p| transport(p.param_type, p.value))
                .collect::<Result<Vec<_>, _>>()?;
            if transports.len() > MAX_TRANSPORT_ADDRESSES {
                return Err(DecodeError::TooManyItems {
                    what: "transports",
                    max: MAX_TRANSPORT_ADDRESSES,
                });
            }
            RserpoolMessage::ServerAnnounce {
                registrar_identifier,
                transports,
            }
        }
        AHT_COOKIE | AHT_COOKIE_ECHO => {
            let params = parameters(r.rest())?;
            let cookie = require(&params, ATT_COOKIE, "cookie")?.to_vec();
            if message_type == AHT_COOKIE {
                RserpoolMessage::Cookie { cookie }
            } else {
                RserpoolMessage::CookieEcho { cookie }
            }
        }
        AHT_BUSINESS_CARD => {
            let params = parameters(r.rest())?;
            RserpoolMessage::BusinessCard {
                pool_handle: pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?,
                elements: pool_elements(&params)?,
            }
        }
        AHT_ERROR => {
            let params = parameters(r.rest())?;
            RserpoolMessage::Error {
                error: operation_error(require(&params, ATT_OPERATION_ERROR, "operation error")?)?,
            }
        }

        EHT_PRESENCE => {
            let header = enrp_header(&mut r)?;
            let params = parameters(r.rest())?;
            let checksum = Reader::new(require(&params, ATT_POOL_ELEMENT_CHECKSUM, "checksum")?)
                .u16()?;
            RserpoolMessage::Presence {
                header,
                reply_required: flags & EHF_PRESENCE_REPLY_REQUIRED != 0,
                checksum,
                server_information: server_information(require(
                    &params,
                    ATT_SERVER_INFORMATION,
                    "server information",
                )?)?,
            }
        }
        EHT_HANDLE_TABLE_REQUEST => RserpoolMessage::HandleTableRequest {
            header: enrp_header(&mut r)?,
            own_children_only: flags & EHF_HANDLE_TABLE_REQUEST_OWN_CHILDREN_ONLY != 0,
        },
        EHT_HANDLE_TABLE_RESPONSE => {
            let header = enrp_header(&mut r)?;
            let params = parameters(r.rest())?;
            RserpoolMessage::HandleTableResponse {
                header,
                more_to_send: flags & EHF_HANDLE_TABLE_RESPONSE_MORE_TO_SEND != 0,
                reject: flags & AHF_REJECT != 0,
                pools: handle_table(&params)?,
            }
        }
        EHT_HANDLE_UPDATE => {
            let header = enrp_header(&mut r)?;
            let action = match r.u16()? {
                PNUP_ADD_PE => HandleUpdateAction::AddPoolElement,
                PNUP_DEL_PE => HandleUpdateAction::DeletePoolElement,
                _ => return Err(DecodeError::InvalidValue("handle update action")),
            };
            let _reserved = r.u16()?;
            let params = parameters(r.rest())?;
            RserpoolMessage::HandleUpdate {
                header,
                action,
                pool_handle: pool_handle(require(&params, ATT_POOL_HANDLE, "pool handle")?)?,
                pool_element: pool_element(require(&params, ATT_POOL_ELEMENT, "pool element")?)?,
            }
        }
        EHT_LIST_REQUEST => RserpoolMessage::ListRequest {
            header: enrp_header(&mut r)?,
        },
        EHT_LIST_RESPONSE => {
            let header = enrp_header(&mut r)?;
            let params = parameters(r.rest())?;
            let servers = params
                .iter()
                .filter(|p| p.param_type == ATT_SERVER_INFORMATION)
                .map(|p| server_information(p.value))
                .collect::<Result<Vec<_>, _>>()?;
            if servers.len() > MAX_SERVER_INFORMATION_ITEMS {
                return Err(DecodeError::TooManyItems {
                    what: "servers",
                    max: MAX_SERVER_INFORMATION_ITEMS,
                });
            }
            RserpoolMessage::ListResponse {
                header,
                reject: flags & AHF_REJECT != 0,
                servers,
            }
        }
        EHT_INIT_TAKEOVER | EHT_INIT_TAKEOVER_ACK | EHT_TAKEOVER_SERVER => {
            let header = enrp_header(&mut r)?;
            let target_server_identifier = r.u32()?;
            match message_type {
                EHT_INIT_TAKEOVER => RserpoolMessage::InitTakeover {
                    header,
                    target_server_identifier,
                },
                EHT_INIT_TAKEOVER_ACK => RserpoolMessage::InitTakeoverAck {
                    header,
                    target_server_identifier,
                },
                _ => RserpoolMessage::TakeoverServer {
                    header,
                    target_server_identifier,
                },
            }
        }
        EHT_ERROR => {
            let header = enrp_header(&mut r)?;
            let params = parameters(r.rest())?;
            RserpoolMessage::EnrpError {
                header,
                error: operation_error(require(&params, ATT_OPERATION_ERROR, "operation error")?)?,
            }
        }
        other => return Err(DecodeError::UnknownMessageType(other)),
    };
    Ok(msg)
}

fn enrp_header(r: &mut Reader<'_>) -> Result<EnrpHeader, DecodeError> {
    Ok(EnrpHeader {
        sender_server_identifier: r.u32()?,
        receiver_server_identifier: r.u32()?,
    })
}

fn pool_handle(value: &[u8]) -> Result<PoolHandle, DecodeError> {
    PoolHandle::new(value).map_err(|_| DecodeError::InvalidValue("pool handle"))
}

fn identifier(value: &[u8]) -> Result<u32, DecodeError> {
    Reader::new(value).u32()
}

fn operation_error(value: &[u8]) -> Result<OperationError, DecodeError> {
    let mut r = Reader::new(value);
    let cause = r.u16()?;
    let length = usize::from(r.u16()?);
    if length < 4 {
        return Err(DecodeError::LengthMismatch {
            declared: length,
            actual: 4,
        });
    }
    let data = r.take(length - 4)?.to_vec();
    Ok(OperationError { cause, data })
}

fn address(param: &RawParameter<'_>) -> Result<IpAddr, DecodeError> {
    match (param.param_type, param.value.len()) {
        (ATT_IPV4_ADDRESS, 4) => {
            let v = param.value;
            Ok(IpAddr::V4(Ipv4Addr::new(v[0], v[1], v[2], v[3])))
        }
        (ATT_IPV6_ADDRESS, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(param.value);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(DecodeError::InvalidValue("address")),
    }
}

fn transport(param_type: u16, value: &[u8]) -> Result<TransportAddressBlock, DecodeError> {
    let protocol = match param_type {
        ATT_SCTP_TRANSPORT => TransportProtocol::Sctp,
        ATT_TCP_TRANSPORT => TransportProtocol::Tcp,
        ATT_UDP_TRANSPORT => TransportProtocol::Udp,
        _ => return Err(DecodeError::InvalidValue("transport")),
    };
    let mut r = Reader::new(value);
    let port = r.u16()?;
    let transport_use = match (protocol, r.u16()?) {
        (TransportProtocol::Udp, _) => TransportUse::DataOnly,
        (_, UTP_DATA_ONLY) => TransportUse::DataOnly,
        (_, UTP_DATA_PLUS_CONTROL) => TransportUse::DataPlusControl,
        _ => return Err(DecodeError::InvalidValue("transport use")),
    };
    let addresses = parameters(r.rest())?
        .iter()
        .filter(|p| matches!(p.param_type, ATT_IPV4_ADDRESS | ATT_IPV6_ADDRESS))
        .map(address)
        .collect::<Result<Vec<_>, _>>()?;
    if addresses.is_empty() {
        return Err(DecodeError::MissingParameter("address"));
    }
    if addresses.len() > MAX_TRANSPORT_ADDRESSES {
        return Err(DecodeError::TooManyItems {
            what: "addresses",
            max: MAX_TRANSPORT_ADDRESSES,
        });
    }
    Ok(TransportAddressBlock {
        protocol,
        port,
        transport_use,
        addresses,
    })
}

fn policy(value: &[u8]) -> Result<PolicySettings, DecodeError> {
    let mut r = Reader::new(value);
    let code = r.u32()?;
    let policy_type = PolicyType::from_code(code).ok_or(DecodeError::InvalidPolicy(code))?;
    let rest = r.rest();
    if rest.len() % 4 != 0 {
        return Err(DecodeError::InvalidPolicy(code));
    }
    let fields: Vec<u32> = rest
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    PolicySettings::from_fields(policy_type, &fields).ok_or(DecodeError::InvalidPolicy(code))
}

fn pool_element(value: &[u8]) -> Result<PoolElementParameter, DecodeError> {
    let mut r = Reader::new(value);
    let identifier = r.u32()?;
    let home_registrar_identifier = r.u32()?;
    let registration_life = r.u32()?;
    let nested = parameters(r.rest())?;

    let mut transports = nested.iter().filter(|p| is_transport(p.param_type));
    let user = transports
        .next()
        .ok_or(DecodeError::MissingParameter("user transport"))?;
    let user_transport = transport(user.param_type, user.value)?;
    let registrator_transport = transports
        .next()
        .map(|p| transport(p.param_type, p.value))
        .transpose()?;
    let policy = policy(require(&nested, ATT_POOL_POLICY, "pool policy")?)?;

    Ok(PoolElementParameter {
        identifier,
        home_registrar_identifier,
        registration_life,
        user_transport,
        policy,
        registrator_transport,
    })
}

fn pool_elements(params: &[RawParameter<'_>]) -> Result<Vec<PoolElementParameter>, DecodeError> {
    let count = params
        .iter()
        .filter(|p| p.param_type == ATT_POOL_ELEMENT)
        .count();
    if count > MAX_MAX_HANDLE_RESOLUTION_ITEMS {
        return Err(DecodeError::TooManyItems {
            what: "pool elements",
            max: MAX_MAX_HANDLE_RESOLUTION_ITEMS,
        });
    }
    params
        .iter()
        .filter(|p| p.param_type == ATT_POOL_ELEMENT)
        .map(|p| pool_element(p.value))
        .collect()
}

fn server_information(value: &[u8]) -> Result<ServerInformation, DecodeError> {
    let mut r = Reader::new(value);
    let server_identifier = r.u32()?;
    let nested = parameters(r.rest())?;
    let t = nested
        .iter()
        .find(|p| is_transport(p.param_type))
        .ok_or(DecodeError::MissingParameter("server transport"))?;
    Ok(ServerInformation {
        server_identifier,
        transport: transport(t.param_type, t.value)?,
    })
}

/// Pool handle parameters each followed by that pool's elements.
fn handle_table(
    params: &[RawParameter<'_>],
) -> Result<Vec<(PoolHandle, Vec<PoolElementParameter>)>, DecodeError> {
    let mut pools: Vec<(PoolHandle, Vec<PoolElementParameter>)> = Vec::new();
    for p in params {
        match p.param_type {
            ATT_POOL_HANDLE => {
                if pools.len() == MAX_HANDLE_TABLE_POOLS {
                    return Err(DecodeError::TooManyItems {
                        what: "pools",
                        max: MAX_HANDLE_TABLE_POOLS,
                    });
                }
                pools.push((pool_handle(p.value)?, Vec::new()));
            }
            ATT_POOL_ELEMENT => {
                let (_, elements) = pools
                    .last_mut()
                    .ok_or(DecodeError::MissingParameter("pool handle"))?;
                if elements.len() == MAX_MAX_HANDLE_RESOLUTION_ITEMS {
                    return Err(DecodeError::TooManyItems {
                        what: "pool elements",
                        max: MAX_MAX_HANDLE_RESOLUTION_ITEMS,
                    });
                }
                elements.push(pool_element(p.value)?);
            }
            _ => {}
        }
    }
    Ok(pools)
}
