// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSerPool ASAP Registrar
//!
//! Standalone registrar that pool elements register with and pool users
//! resolve pool handles against:
//! - REGISTRATION / DEREGISTRATION with home-registrar ownership
//! - HANDLE_RESOLUTION served through the pool policies of `rserpool`
//! - ENDPOINT_KEEP_ALIVE supervision of registered elements
//! - ENDPOINT_UNREACHABLE reports counted towards removal
//! - Periodic SERVER_ANNOUNCE over UDP multicast
//!
//! The daemon binary wraps [`Registrar`]; tests drive it in-process through
//! [`Registrar::serve`] on a pre-bound listener.

pub mod config;
pub mod server;

pub use config::{ConfigError, RegistrarConfig};
pub use server::{Registrar, ServerError};
