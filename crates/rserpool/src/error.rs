// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by the handlespace, the registrar table and the ASAP engine.
//!
//! Every public operation returns [`Result`]; ordinary network failures never panic.
//! Codec-level failures have their own [`DecodeError`](crate::message::DecodeError)
//! and are folded into [`RspError::ProtocolViolation`] when they reach the engine.

use crate::message::{DecodeError, EncodeError};
use crate::message::constants::*;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RspError>;

/// RSerPool error kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RspError {
    /// Resource exhaustion while building a message or inserting a node.
    #[error("out of memory")]
    OutOfMemory,

    /// Pool handle is empty or longer than [`MAX_POOL_HANDLE_SIZE`].
    #[error("invalid pool handle")]
    InvalidPoolHandle,

    /// Pool or pool element is absent.
    #[error("not found")]
    NotFound,

    /// No registrar connection and the registrar hunt failed.
    #[error("no registrar available")]
    NoRegistrar,

    /// Request was sent but the registrar never replied.
    #[error("registrar response timeout")]
    Timeout,

    /// Reregistration settings differ from the existing local registration.
    #[error("incompatible reregistration")]
    IncompatibleReregistration,

    /// Pool element policy differs from the pool's policy.
    #[error("incompatible pool policy")]
    IncompatiblePoolPolicy,

    /// Pool element transport differs from the pool's transport protocol or usage.
    #[error("incompatible pool transport")]
    IncompatiblePoolTransport,

    /// Unexpected response type, mismatched identifier or malformed message.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Registrar cannot reach any advertised user transport address.
    #[error("no usable user transport addresses")]
    NoUsableUserAddresses,

    /// Registrar cannot reach any advertised ASAP transport address.
    #[error("no usable ASAP transport addresses")]
    NoUsableAsapAddresses,

    /// Registrar rejected the request with an operation error cause.
    #[error("registrar rejected request (cause 0x{cause:04x})")]
    RegistrarRejected {
        /// Operation error cause code.
        cause: u16,
    },

    /// Caller-supplied conversion failed for a resolved pool element.
    #[error("pool element conversion failed")]
    ConversionFailed,

    /// Request abandoned because the ASAP instance is shutting down.
    #[error("aborted by shutdown")]
    Aborted,

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RspError {
    /// Map a registrar operation-error cause onto an error kind.
    pub fn from_cause(cause: u16) -> Self {
        match cause {
            AEC_INCONSISTENT_POOL_POLICY => Self::IncompatiblePoolPolicy,
            AEC_INCONSISTENT_TRANSPORT_TYPE | AEC_INCONSISTENT_DATA_CONTROL_CONFIGURATION => {
                Self::IncompatiblePoolTransport
            }
            AEC_UNKNOWN_POOL_HANDLE => Self::NotFound,
            AEC_INVALID_VALUES => Self::InvalidPoolHandle,
            AEC_LACK_OF_RESOURCES => Self::OutOfMemory,
            AEC_NO_USABLE_USER_ADDRESSES => Self::NoUsableUserAddresses,
            AEC_NO_USABLE_ASAP_ADDRESSES => Self::NoUsableAsapAddresses,
            cause => Self::RegistrarRejected { cause },
        }
    }

    /// Operation-error cause a registrar reports for this error.
    pub fn to_cause(&self) -> u16 {
        match self {
            Self::IncompatiblePoolPolicy => AEC_INCONSISTENT_POOL_POLICY,
            Self::IncompatiblePoolTransport => AEC_INCONSISTENT_TRANSPORT_TYPE,
            Self::NotFound => AEC_UNKNOWN_POOL_HANDLE,
            Self::InvalidPoolHandle => AEC_INVALID_VALUES,
            Self::OutOfMemory => AEC_LACK_OF_RESOURCES,
            Self::NoUsableUserAddresses => AEC_NO_USABLE_USER_ADDRESSES,
            Self::NoUsableAsapAddresses => AEC_NO_USABLE_ASAP_ADDRESSES,
            Self::RegistrarRejected { cause } => *cause,
            _ => AEC_UNSPECIFIED,
        }
    }

    /// Whether the registrar connection must be torn down after this error.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_) | Self::Timeout | Self::Io(_))
    }
}

impl From<DecodeError> for RspError {
    fn from(e: DecodeError) -> Self {
        Self::ProtocolViolation(e.to_string())
    }
}

impl From<EncodeError> for RspError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::MessageTooLarge(_) => Self::OutOfMemory,
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RspError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_mapping_roundtrip() {
        for err in [
            RspError::IncompatiblePoolPolicy,
            RspError::NotFound,
            RspError::NoUsableUserAddresses,
            RspError::NoUsableAsapAddresses,
            RspError::RegistrarRejected { cause: 0x0004 },
        ] {
            assert_eq!(RspError::from_cause(err.to_cause()), err);
        }
    }

    #[test]
    fn test_connection_fatal() {
        assert!(RspError::Timeout.is_connection_fatal());
        assert!(RspError::ProtocolViolation("bad".into()).is_connection_fatal());
        assert!(!RspError::NotFound.is_connection_fatal());
        assert!(!RspError::IncompatibleReregistration.is_connection_fatal());
    }

    #[test]
    fn test_display() {
        let err = RspError::RegistrarRejected { cause: 0x1000 };
        assert!(err.to_string().contains("0x1000"));
        assert!(RspError::Timeout.to_string().contains("timeout"));
    }
}
