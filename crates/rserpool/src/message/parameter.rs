// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Composite TLV parameters carried inside ASAP and ENRP messages.

use crate::message::constants::AEC_UNSPECIFIED;
use crate::policy::PolicySettings;
use crate::types::{PoolElementIdentifier, RegistrarIdentifier, TransportAddressBlock};

/// Pool element parameter (RFC 5354 section 3.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolElementParameter {
    pub identifier: PoolElementIdentifier,
    pub home_registrar_identifier: RegistrarIdentifier,
    /// Registration life in milliseconds.
    pub registration_life: u32,
    pub user_transport: TransportAddressBlock,
    pub policy: PolicySettings,
    /// Transport the registration arrived on, if the registrar exposes it.
    pub registrator_transport: Option<TransportAddressBlock>,
}

/// Server information parameter: one registrar and its ASAP/ENRP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInformation {
    pub server_identifier: RegistrarIdentifier,
    pub transport: TransportAddressBlock,
}

/// Operation error parameter carrying a single cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    pub cause: u16,
    /// Cause-specific data (e.g. the offending parameter).
    pub data: Vec<u8>,
}

impl OperationError {
    pub fn new(cause: u16) -> Self {
        Self {
            cause,
            data: Vec::new(),
        }
    }

    pub fn with_data(cause: u16, data: Vec<u8>) -> Self {
        Self { cause, data }
    }

    /// Error used when a reject flag arrives without a cause.
    pub fn unspecified() -> Self {
        Self::new(AEC_UNSPECIFIED)
    }
}

/// ENRP HANDLE_UPDATE action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleUpdateAction {
    AddPoolElement,
    DeletePoolElement,
}

/// Sender/receiver identifiers common to every ENRP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnrpHeader {
    pub sender_server_identifier: RegistrarIdentifier,
    pub receiver_server_identifier: RegistrarIdentifier,
}

impl EnrpHeader {
    pub fn new(sender: RegistrarIdentifier, receiver: RegistrarIdentifier) -> Self {
        Self {
            sender_server_identifier: sender,
            receiver_server_identifier: receiver,
        }
    }
}
