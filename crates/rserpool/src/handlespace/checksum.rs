// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Order-independent handlespace checksums.
//!
//! Each pool element contributes a 16-bit one's-complement word sum (RFC 1071
//! style). Accumulators add and subtract contributions modulo 65535, so the
//! result does not depend on insertion order and `0xffff` folds onto zero.

use crate::policy::PolicySettings;
use crate::types::{PoolElementIdentifier, PoolHandle, RegistrarIdentifier};

/// 16-bit handlespace checksum value.
pub type Checksum = u16;

const MODULUS: u32 = 0xffff;

/// One's-complement word sum of `bytes`; an odd trailing byte is zero-padded.
pub fn compute_checksum(bytes: &[u8]) -> Checksum {
    let mut sum: u64 = 0;
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        sum += u64::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u64::from(*last) << 8;
    }
    (sum % u64::from(MODULUS)) as Checksum
}

/// Contribution of one pool element.
pub fn pool_element_checksum(
    pool_handle: &PoolHandle,
    identifier: PoolElementIdentifier,
    home_registrar_identifier: RegistrarIdentifier,
    policy: &PolicySettings,
) -> Checksum {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(pool_handle.as_bytes());
    buf.resize((buf.len() + 3) & !3, 0);
    buf.extend_from_slice(&identifier.to_be_bytes());
    buf.extend_from_slice(&home_registrar_identifier.to_be_bytes());
    buf.extend_from_slice(&policy.policy_type.code().to_be_bytes());
    for field in policy.fields() {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    compute_checksum(&buf)
}

/// Running sum of element contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumAccumulator(u32);

impl ChecksumAccumulator {
    pub fn add(&mut self, checksum: Checksum) {
        self.0 = (self.0 + u32::from(checksum) % MODULUS) % MODULUS;
    }

    pub fn remove(&mut self, checksum: Checksum) {
        self.0 = (self.0 + MODULUS - u32::from(checksum) % MODULUS) % MODULUS;
    }

    pub fn value(&self) -> Checksum {
        self.0 as Checksum
    }
}
