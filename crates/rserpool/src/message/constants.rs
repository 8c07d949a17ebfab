// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSerPool protocol constants (RFC 5352 ASAP, RFC 5353 ENRP, RFC 5354 parameters).
//!
//! Message type tags are 16-bit internally: the high byte names the protocol
//! family (`0xaa` ASAP, `0xee` ENRP), the low byte is the on-wire type octet.
//! The family itself travels out of band as the payload protocol identifier.

// ============================================================================
// Transport
// ============================================================================

/// Well-known ASAP port.
pub const ASAP_PORT: u16 = 3863;

/// Well-known ENRP port.
pub const ENRP_PORT: u16 = 9901;

/// Payload protocol identifier for ASAP.
pub const PPID_ASAP: u32 = 11;

/// Payload protocol identifier for ENRP.
pub const PPID_ENRP: u32 = 12;

/// Default multicast group for registrar announces.
pub const DEFAULT_ANNOUNCE_GROUP: [u8; 4] = [239, 0, 0, 50];

// ============================================================================
// Message types
// ============================================================================

pub const ASAP_FAMILY: u16 = 0xaa00;
pub const ENRP_FAMILY: u16 = 0xee00;

pub const AHT_REGISTRATION: u16 = 0xaa01;
pub const AHT_DEREGISTRATION: u16 = 0xaa02;
pub const AHT_REGISTRATION_RESPONSE: u16 = 0xaa03;
pub const AHT_DEREGISTRATION_RESPONSE: u16 = 0xaa04;
pub const AHT_HANDLE_RESOLUTION: u16 = 0xaa05;
pub const AHT_HANDLE_RESOLUTION_RESPONSE: u16 = 0xaa06;
pub const AHT_ENDPOINT_KEEP_ALIVE: u16 = 0xaa07;
pub const AHT_ENDPOINT_KEEP_ALIVE_ACK: u16 = 0xaa08;
pub const AHT_ENDPOINT_UNREACHABLE: u16 = 0xaa09;
pub const AHT_SERVER_ANNOUNCE: u16 = 0xaa0a;
pub const AHT_COOKIE: u16 = 0xaa0b;
pub const AHT_COOKIE_ECHO: u16 = 0xaa0c;
pub const AHT_BUSINESS_CARD: u16 = 0xaa0d;
pub const AHT_ERROR: u16 = 0xaa0e;

pub const EHT_PRESENCE: u16 = 0xee01;
pub const EHT_HANDLE_TABLE_REQUEST: u16 = 0xee02;
pub const EHT_HANDLE_TABLE_RESPONSE: u16 = 0xee03;
pub const EHT_HANDLE_UPDATE: u16 = 0xee04;
pub const EHT_LIST_REQUEST: u16 = 0xee05;
pub const EHT_LIST_RESPONSE: u16 = 0xee06;
pub const EHT_INIT_TAKEOVER: u16 = 0xee07;
pub const EHT_INIT_TAKEOVER_ACK: u16 = 0xee08;
pub const EHT_TAKEOVER_SERVER: u16 = 0xee09;
pub const EHT_ERROR: u16 = 0xee0a;

// ============================================================================
// Message flags
// ============================================================================

/// Reject flag of registration/deregistration/list/handle-table responses.
pub const AHF_REJECT: u8 = 0x01;

/// Home flag of ENDPOINT_KEEP_ALIVE.
pub const AHF_HOME: u8 = 0x01;

/// Reply-required flag of ENRP PRESENCE.
pub const EHF_PRESENCE_REPLY_REQUIRED: u8 = 0x01;

/// Own-children-only flag of ENRP HANDLE_TABLE_REQUEST.
pub const EHF_HANDLE_TABLE_REQUEST_OWN_CHILDREN_ONLY: u8 = 0x01;

/// More-to-send flag of ENRP HANDLE_TABLE_RESPONSE.
pub const EHF_HANDLE_TABLE_RESPONSE_MORE_TO_SEND: u8 = 0x02;

/// ENRP HANDLE_UPDATE function codes.
pub const PNUP_ADD_PE: u16 = 0x0000;
pub const PNUP_DEL_PE: u16 = 0x0001;

// ============================================================================
// Parameter types
// ============================================================================

/// Action bits carried in the two high bits of a parameter type.
pub const ATT_ACTION_MASK: u16 = 0xc000;
pub const ATT_ACTION_STOP: u16 = 0x0000;
pub const ATT_ACTION_STOP_AND_REPORT: u16 = 0x4000;
pub const ATT_ACTION_CONTINUE: u16 = 0x8000;
pub const ATT_ACTION_CONTINUE_AND_REPORT: u16 = 0xc000;

pub const ATT_IPV4_ADDRESS: u16 = 0x0001;
pub const ATT_IPV6_ADDRESS: u16 = 0x0002;
pub const ATT_SCTP_TRANSPORT: u16 = 0x0004;
pub const ATT_TCP_TRANSPORT: u16 = 0x0005;
pub const ATT_UDP_TRANSPORT: u16 = 0x0006;
pub const ATT_POOL_POLICY: u16 = 0x0008;
pub const ATT_POOL_HANDLE: u16 = 0x0009;
pub const ATT_POOL_ELEMENT: u16 = 0x000a;
pub const ATT_SERVER_INFORMATION: u16 = 0x000b;
pub const ATT_OPERATION_ERROR: u16 = 0x000c;
pub const ATT_COOKIE: u16 = 0x000d;
pub const ATT_POOL_ELEMENT_IDENTIFIER: u16 = 0x000e;
pub const ATT_POOL_ELEMENT_CHECKSUM: u16 = 0x000f;
pub const ATT_HANDLE_RESOLUTION: u16 = 0x803f;

/// Transport use field values.
pub const UTP_DATA_ONLY: u16 = 0x0000;
pub const UTP_DATA_PLUS_CONTROL: u16 = 0x0001;

// ============================================================================
// Operation error causes
// ============================================================================

pub const AEC_UNSPECIFIED: u16 = 0x0000;
pub const AEC_UNRECOGNIZED_PARAMETER: u16 = 0x0001;
pub const AEC_UNRECOGNIZED_MESSAGE: u16 = 0x0002;
pub const AEC_INVALID_VALUES: u16 = 0x0003;
pub const AEC_NONUNIQUE_PE_ID: u16 = 0x0004;
pub const AEC_INCONSISTENT_POOL_POLICY: u16 = 0x0005;
pub const AEC_LACK_OF_RESOURCES: u16 = 0x0006;
pub const AEC_INCONSISTENT_TRANSPORT_TYPE: u16 = 0x0007;
pub const AEC_INCONSISTENT_DATA_CONTROL_CONFIGURATION: u16 = 0x0008;
pub const AEC_UNKNOWN_POOL_HANDLE: u16 = 0x0009;
pub const AEC_REJECTED_SECURITY: u16 = 0x000a;
pub const AEC_NO_USABLE_USER_ADDRESSES: u16 = 0x1000;
pub const AEC_NO_USABLE_ASAP_ADDRESSES: u16 = 0x1001;

// ============================================================================
// Limits
// ============================================================================

/// Message header: type (1) + flags (1) + length (2).
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Parameter (TLV) header: type (2) + length (2).
pub const PARAMETER_HEADER_SIZE: usize = 4;

/// Largest encodable message (length field is 16 bits).
pub const MAX_MESSAGE_SIZE: usize = 65532;

/// Largest pool handle in bytes.
pub const MAX_POOL_HANDLE_SIZE: usize = 32;

/// Largest number of addresses in one transport parameter.
pub const MAX_TRANSPORT_ADDRESSES: usize = 16;

/// Largest number of pool elements in one handle resolution response.
pub const MAX_MAX_HANDLE_RESOLUTION_ITEMS: usize = 128;

/// Largest number of servers in one ENRP list response.
pub const MAX_SERVER_INFORMATION_ITEMS: usize = 128;

/// Largest number of pools in one ENRP handle table response.
pub const MAX_HANDLE_TABLE_POOLS: usize = 128;

/// Largest cookie or opaque error payload.
pub const MAX_OPAQUE_SIZE: usize = 16384;

/// Registrar identifier meaning "not yet known".
pub const UNDEFINED_REGISTRAR_IDENTIFIER: u32 = 0;

/// Pool element identifier meaning "choose one".
pub const UNDEFINED_POOL_ELEMENT_IDENTIFIER: u32 = 0;

/// Round a length up to the next 4-byte boundary.
#[inline]
pub const fn padded(len: usize) -> usize {
    (len + 3) & !3
}
