// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::collections::{BTreeMap, BTreeSet};

use crate::policy::{PolicyType, SortKey};
use crate::types::{PoolElementIdentifier, PoolHandle, TransportProtocol, TransportUse};

use super::arena::NodeHandle;

/// One named pool: its policy and its elements, indexed by identifier and by
/// selection order.
#[derive(Debug)]
pub struct PoolNode {
    pub handle: PoolHandle,
    pub policy_type: PolicyType,
    pub protocol: TransportProtocol,
    pub transport_use: TransportUse,
    pub(crate) elements: BTreeMap<PoolElementIdentifier, NodeHandle>,
    pub(crate) selection: BTreeSet<(SortKey, NodeHandle)>,
    next_sequence: u64,
}

impl PoolNode {
    pub(crate) fn new(
        handle: PoolHandle,
        policy_type: PolicyType,
        protocol: TransportProtocol,
        transport_use: TransportUse,
    ) -> Self {
        Self {
            handle,
            policy_type,
            protocol,
            transport_use,
            elements: BTreeMap::new(),
            selection: BTreeSet::new(),
            next_sequence: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element identifiers in ascending order.
    pub fn identifiers(&self) -> impl Iterator<Item = PoolElementIdentifier> + '_ {
        self.elements.keys().copied()
    }

    pub(crate) fn handle_of(&self, identifier: PoolElementIdentifier) -> Option<NodeHandle> {
        self.elements.get(&identifier).copied()
    }

    /// Element handles in selection order.
    pub(crate) fn selection_order(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.selection.iter().map(|(_, h)| *h)
    }

    /// Hand out the next sequence number; `None` once the space is exhausted
    /// and the pool must be resequenced.
    pub(crate) fn take_sequence(&mut self) -> Option<u64> {
        if self.next_sequence == u64::MAX {
            return None;
        }
        let seq = self.next_sequence;
        self.next_sequence += 1;
        Some(seq)
    }

    pub(crate) fn reset_sequence(&mut self) {
        self.next_sequence = 1;
    }

    #[cfg(test)]
    pub(crate) fn set_next_sequence(&mut self, next: u64) {
        self.next_sequence = next;
    }

    /// Smallest round counter currently in the pool (weighted round robin).
    pub(crate) fn min_round(&self) -> u64 {
        self.selection
            .iter()
            .next()
            .map(|(key, _)| key.primary)
            .unwrap_or(0)
    }
}
