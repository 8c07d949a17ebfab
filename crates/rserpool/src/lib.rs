// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rserpool - Reliable Server Pooling in pure Rust
//!
//! Pool elements register under a pool handle with a registrar; pool users
//! resolve a pool handle to one or more elements chosen by the pool's
//! selection policy. This crate provides the ASAP endpoint side plus the
//! building blocks a registrar needs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rserpool::{AsapConfig, AsapInstance, PolicySettings, PoolElementParameter, PoolHandle,
//!     TransportAddressBlock};
//!
//! fn main() -> rserpool::Result<()> {
//!     let asap = AsapInstance::new(AsapConfig::default())?;
//!     let pool = PoolHandle::try_from("EchoPool")?;
//!
//!     let element = PoolElementParameter {
//!         identifier: 0,
//!         home_registrar_identifier: 0,
//!         registration_life: 30_000,
//!         user_transport: TransportAddressBlock::tcp("192.0.2.1:7".parse().unwrap()),
//!         policy: PolicySettings::least_used(0),
//!         registrator_transport: None,
//!     };
//!     let id = asap.register(&pool, &element, true, false)?;
//!
//!     let peers = asap.handle_resolution(&pool, 1, 5_000_000, |pe| Some(pe.identifier))?;
//!     println!("registered ${:08x}, resolved {:?}", id, peers);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |   AsapInstance (register / deregister / handle_resolution)    |
//! +---------------------------------------------------------------+
//! |   worker thread: request FIFO | keep-alive | registrar hunt   |
//! +------------------------------+--------------------------------+
//! |   PoolHandlespace + policies |   RegistrarTable + announces   |
//! +------------------------------+--------------------------------+
//! |   message codec (TLV)  |  Transport (framed TCP, PPID)        |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`asap`] - client engine (start here)
//! - [`handlespace`] - pools, elements, timers and checksums
//! - [`policy`] - the sixteen pool selection policies
//! - [`message`] - ASAP/ENRP message codec
//! - [`registrar`] - registrar table, announces and hunt
//! - [`transport`] - framed TCP transport

/// ASAP client engine.
pub mod asap;
/// Time source abstraction (microseconds).
pub mod clock;
/// Endpoint configuration (file, option list and builder forms).
pub mod config;
/// Error type shared by every module.
pub mod error;
/// Pool handlespace storage.
pub mod handlespace;
/// Message and parameter codec.
pub mod message;
/// Pool selection policies.
pub mod policy;
/// Registrar discovery.
pub mod registrar;
/// Message transport.
pub mod transport;
/// Pool handles and transport address blocks.
pub mod types;

pub use asap::{AsapInstance, RegistrarConnection};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AsapConfig, ConfigError};
pub use error::{Result, RspError};
pub use handlespace::{PoolElementNode, PoolHandlespace};
pub use message::{decode, encode, OperationError, PoolElementParameter, RserpoolMessage};
pub use policy::{PolicySettings, PolicyType};
pub use transport::{TcpTransport, Transport, TransportEvent};
pub use types::{
    PoolElementIdentifier, PoolHandle, RegistrarIdentifier, TransportAddressBlock,
    TransportProtocol, TransportUse,
};
