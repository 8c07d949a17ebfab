// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Known registrars and the registrar hunt.
//!
//! The [`RegistrarTable`] is filled from static configuration (never
//! expires) and from SERVER_ANNOUNCE messages ([`AnnounceListener`]).
//!
//! Dynamic entries expire after the announce timeout of silence.
//! [`find_registrar`] walks the table to establish a registrar connection.

mod announce;
mod hunt;

pub use announce::{create_announce_socket, handle_announce, AnnounceListener};
pub use hunt::{find_registrar, HuntOutcome, HuntSettings};

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use crate::message::constants::UNDEFINED_REGISTRAR_IDENTIFIER;
use crate::types::{RegistrarIdentifier, TransportAddressBlock};

/// Where a registrar entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    Static,
    Announce,
}

/// One known registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrarEntry {
    /// Zero until learned (static entries start unidentified).
    pub identifier: RegistrarIdentifier,
    pub transport: TransportAddressBlock,
    pub origin: EntryOrigin,
    /// Absolute expiry (µs); `None` for static entries.
    pub expiry: Option<u64>,
}

impl RegistrarEntry {
    fn serves(&self, addr: &SocketAddr) -> bool {
        self.transport.port == addr.port() && self.transport.addresses.contains(&addr.ip())
    }
}

/// Table of known registrars.
#[derive(Debug)]
pub struct RegistrarTable {
    entries: BTreeMap<u64, RegistrarEntry>,
    expiry_index: BTreeSet<(u64, u64)>,
    next_key: u64,
    announce_timeout_us: u64,
    rotation: usize,
    last_announce_heard: Option<u64>,
    preferred: Option<(RegistrarIdentifier, SocketAddr)>,
    generation: u64,
}

impl RegistrarTable {
    pub fn new(announce_timeout_us: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            expiry_index: BTreeSet::new(),
            next_key: 1,
            announce_timeout_us,
            rotation: 0,
            last_announce_heard: None,
            preferred: None,
            generation: 0,
        }
    }

    /// Add a statically configured registrar.
    pub fn add_static_entry(&mut self, transport: TransportAddressBlock) {
        if self
            .entries
            .values()
            .any(|e| e.origin == EntryOrigin::Static && e.transport == transport)
        {
            return;
        }
        log::debug!("[registrar-table] static registrar {}", transport);
        self.insert(RegistrarEntry {
            identifier: UNDEFINED_REGISTRAR_IDENTIFIER,
            transport,
            origin: EntryOrigin::Static,
            expiry: None,
        });
    }

    /// Upsert a registrar heard through a multicast announce.
    ///
    /// Returns `true` if the registrar was not known before.
    pub fn register_peer_from_announce(
        &mut self,
        identifier: RegistrarIdentifier,
        transport: TransportAddressBlock,
        now: u64,
    ) -> bool {
        let (key, learned) = self.upsert(identifier, transport, EntryOrigin::Announce, now);
        self.last_announce_heard = Some(key);
        learned
    }

    fn upsert(
        &mut self,
        identifier: RegistrarIdentifier,
        transport: TransportAddressBlock,
        origin: EntryOrigin,
        now: u64,
    ) -> (u64, bool) {
        let existing = self
            .entries
            .iter()
            .find(|(_, e)| {
                (identifier != UNDEFINED_REGISTRAR_IDENTIFIER && e.identifier == identifier)
                    || e.transport.overlaps(&transport)
            })
            .map(|(k, _)| *k);

        let expiry = now.saturating_add(self.announce_timeout_us);
        match existing {
            Some(key) => {
                let mut previous_expiry = None;
                if let Some(entry) = self.entries.get_mut(&key) {
                    if identifier != UNDEFINED_REGISTRAR_IDENTIFIER {
                        entry.identifier = identifier;
                    }
                    if entry.origin != EntryOrigin::Static {
                        entry.transport = transport;
                        previous_expiry = entry.expiry.replace(expiry);
                        self.expiry_index.insert((expiry, key));
                    }
                }
                if let Some(previous) = previous_expiry {
                    if previous != expiry {
                        self.expiry_index.remove(&(previous, key));
                    }
                }
                (key, false)
            }
            None => {
                log::debug!(
                    "[registrar-table] learned registrar ${:08x} at {}",
                    identifier,
                    transport
                );
                let key = self.insert(RegistrarEntry {
                    identifier,
                    transport,
                    origin,
                    expiry: Some(expiry),
                });
                self.generation += 1;
                (key, true)
            }
        }
    }

    fn insert(&mut self, entry: RegistrarEntry) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        if let Some(expiry) = entry.expiry {
            self.expiry_index.insert((expiry, key));
        }
        self.entries.insert(key, entry);
        key
    }

    /// Drop dynamic entries whose announce timeout has passed.
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let expired: Vec<(u64, u64)> = self
            .expiry_index
            .iter()
            .take_while(|(t, _)| *t <= now)
            .copied()
            .collect();
        for item in &expired {
            self.expiry_index.remove(item);
            if let Some(entry) = self.entries.remove(&item.1) {
                log::debug!(
                    "[registrar-table] registrar ${:08x} at {} timed out",
                    entry.identifier,
                    entry.transport
                );
            }
            if self.last_announce_heard == Some(item.1) {
                self.last_announce_heard = None;
            }
        }
        expired.len()
    }

    /// Connection candidates for the next hunt round.
    ///
    /// Order: the pinned registrar, the most recently announced one, then all
    /// entries round-robin starting one further on each call. Duplicates are
    /// removed.
    pub fn candidates(&mut self) -> Vec<SocketAddr> {
        let mut out: Vec<SocketAddr> = Vec::new();
        let push = |addr: SocketAddr, out: &mut Vec<SocketAddr>| {
            if !out.contains(&addr) {
                out.push(addr);
            }
        };

        if let Some((_, addr)) = self.preferred {
            push(addr, &mut out);
        }
        if let Some(entry) = self.last_announce_heard.and_then(|k| self.entries.get(&k)) {
            for addr in entry.transport.socket_addrs() {
                push(addr, &mut out);
            }
        }
        let entries: Vec<&RegistrarEntry> = self.entries.values().collect();
        if !entries.is_empty() {
            let start = self.rotation % entries.len();
            for i in 0..entries.len() {
                for addr in entries[(start + i) % entries.len()].transport.socket_addrs() {
                    push(addr, &mut out);
                }
            }
            self.rotation = self.rotation.wrapping_add(1);
        }
        out
    }

    /// Identifier of the registrar serving `addr`, if known.
    pub fn identify(&self, addr: &SocketAddr) -> RegistrarIdentifier {
        if let Some((id, pinned)) = self.preferred {
            if pinned == *addr && id != UNDEFINED_REGISTRAR_IDENTIFIER {
                return id;
            }
        }
        self.entries
            .values()
            .find(|e| e.serves(addr))
            .map(|e| e.identifier)
            .unwrap_or(UNDEFINED_REGISTRAR_IDENTIFIER)
    }

    /// Record the identifier of the registrar at `addr` once it has been learned.
    pub fn learn_identifier(&mut self, addr: &SocketAddr, identifier: RegistrarIdentifier) {
        if identifier == UNDEFINED_REGISTRAR_IDENTIFIER {
            return;
        }
        for entry in self.entries.values_mut().filter(|e| e.serves(addr)) {
            entry.identifier = identifier;
        }
    }

    /// Rank a specific registrar first in the next hunt.
    pub fn pin(&mut self, identifier: RegistrarIdentifier, addr: SocketAddr) {
        self.preferred = Some((identifier, addr));
    }

    pub fn unpin(&mut self) {
        self.preferred = None;
    }

    pub fn pinned(&self) -> Option<(RegistrarIdentifier, SocketAddr)> {
        self.preferred
    }

    /// Most recently announced registrar.
    pub fn last_announce_heard(&self) -> Option<&RegistrarEntry> {
        self.last_announce_heard.and_then(|k| self.entries.get(&k))
    }

    /// Bumped every time a previously unknown registrar is learned.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn announce_timeout_us(&self) -> u64 {
        self.announce_timeout_us
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistrarEntry> + '_ {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(s: &str) -> TransportAddressBlock {
        TransportAddressBlock::tcp(s.parse().unwrap())
    }

    #[test]
    fn test_static_entries_never_expire() {
        let mut table = RegistrarTable::new(1_000);
        table.add_static_entry(block("10.0.0.1:3863"));
        table.add_static_entry(block("10.0.0.1:3863"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.purge_expired(u64::MAX), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_announce_upsert_refreshes_expiry() {
        let mut table = RegistrarTable::new(1_000);
        assert!(table.register_peer_from_announce(7, block("10.0.0.2:3863"), 100));
        assert!(!table.register_peer_from_announce(7, block("10.0.0.2:3863"), 900));
        assert_eq!(table.len(), 1);
        assert_eq!(table.generation(), 1);

        // Refreshed at 900: alive until 1900.
        assert_eq!(table.purge_expired(1_500), 0);
        assert_eq!(table.purge_expired(1_900), 1);
        assert!(table.is_empty());
        assert!(table.last_announce_heard().is_none());
    }

    #[test]
    fn test_announce_identifies_static_entry() {
        let mut table = RegistrarTable::new(1_000);
        table.add_static_entry(block("10.0.0.1:3863"));
        let addr: SocketAddr = "10.0.0.1:3863".parse().unwrap();
        assert_eq!(table.identify(&addr), 0);
        assert!(!table.register_peer_from_announce(42, block("10.0.0.1:3863"), 0));
        assert_eq!(table.identify(&addr), 42);
        // Still static.
        assert_eq!(table.purge_expired(u64::MAX), 0);
    }

    #[test]
    fn test_candidate_order() {
        let mut table = RegistrarTable::new(1_000_000);
        table.add_static_entry(block("10.0.0.1:3863"));
        table.add_static_entry(block("10.0.0.2:3863"));
        table.add_static_entry(block("10.0.0.3:3863"));

        let first = table.candidates();
        let second = table.candidates();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert_ne!(first[0], second[0]);

        table.register_peer_from_announce(5, block("10.0.0.9:3863"), 0);
        assert_eq!(table.candidates()[0], "10.0.0.9:3863".parse().unwrap());

        let pinned: SocketAddr = "10.0.0.2:3863".parse().unwrap();
        table.pin(2, pinned);
        let order = table.candidates();
        assert_eq!(order[0], pinned);
        assert_eq!(order.len(), 4);
        assert_eq!(table.identify(&pinned), 2);
        table.unpin();
        assert!(table.pinned().is_none());
    }
}
