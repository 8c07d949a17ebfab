// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool handlespace: the registry of pools and pool elements.
//!
//! Every [`PoolElementNode`] lives in one generational [`Arena`]; the indices
//! below store [`NodeHandle`]s only:
//!
//! | Index | Key | Used for |
//! |-------|-----|----------|
//! | `pools` | pool handle, then identifier / selection key | lookup, handle resolution |
//! | `by_owner` | `(home registrar, handle)` | ownership queries and checksums |
//! | `by_connection` | `(connection, handle)` | dropping a connection's registrations |
//! | `timers` | `(timestamp, handle)` | expiry and keep-alive scheduling |
//!
//! The handlespace checksum and per-owner ownership checksums are maintained
//! incrementally on every insert, update and removal. [`PoolHandlespace::verify`]
//! recomputes everything from scratch.

mod arena;
mod checksum;
mod element;
mod pool;

#[cfg(test)]
mod tests;

pub use arena::NodeHandle;
pub use checksum::{compute_checksum, pool_element_checksum, Checksum, ChecksumAccumulator};
pub use element::{ConnectionId, PoolElementNode, TimerCode};
pub use pool::PoolNode;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Result, RspError};
use crate::message::PoolElementParameter;
use crate::policy::{
    apply_selection, sampling, sampling_weight, sort_key, PolicyState, PolicyType,
    SelectionStrategy, ROUND_COUNTER_RESET_THRESHOLD,
};
use crate::types::{PoolElementIdentifier, PoolHandle, RegistrarIdentifier};
use arena::Arena;

/// Multi-index registry of pool elements.
pub struct PoolHandlespace {
    arena: Arena<PoolElementNode>,
    pools: BTreeMap<PoolHandle, PoolNode>,
    by_owner: BTreeSet<(RegistrarIdentifier, NodeHandle)>,
    by_connection: BTreeSet<(ConnectionId, NodeHandle)>,
    timers: BTreeSet<(u64, NodeHandle)>,
    handlespace_checksum: ChecksumAccumulator,
    ownership_checksums: HashMap<RegistrarIdentifier, ChecksumAccumulator>,
    rng: fastrand::Rng,
}

impl Default for PoolHandlespace {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolHandlespace {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Handlespace with a seeded RNG, for reproducible randomized selection.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            arena: Arena::new(),
            pools: BTreeMap::new(),
            by_owner: BTreeSet::new(),
            by_connection: BTreeSet::new(),
            timers: BTreeSet::new(),
            handlespace_checksum: ChecksumAccumulator::default(),
            ownership_checksums: HashMap::new(),
            rng,
        }
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register `element` in `pool_handle`, or update it in place if the
    /// `(pool_handle, identifier)` pair already exists.
    ///
    /// Reregistration compatibility is the caller's concern
    /// (see [`PoolElementNode::check_compatibility`]); this only enforces that
    /// the element matches the pool's policy and transport.
    ///
    /// # Errors
    /// - `IncompatiblePoolPolicy` / `IncompatiblePoolTransport` on pool mismatch.
    /// - `OutOfMemory` when the arena is exhausted.
    pub fn register_pool_element(
        &mut self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
        connection: Option<ConnectionId>,
        now: u64,
    ) -> Result<NodeHandle> {
        if let Some(pool) = self.pools.get(pool_handle) {
            if pool.policy_type != element.policy.policy_type {
                return Err(RspError::IncompatiblePoolPolicy);
            }
            if pool.protocol != element.user_transport.protocol
                || pool.transport_use != element.user_transport.transport_use
            {
                return Err(RspError::IncompatiblePoolTransport);
            }
            if let Some(handle) = pool.handle_of(element.identifier) {
                self.update_element(handle, element, connection, now)?;
                log::debug!(
                    "[handlespace] updated {}/${:08x}",
                    pool_handle,
                    element.identifier
                );
                return Ok(handle);
            }
        }
        let handle = self.insert_element(pool_handle, element, connection, now)?;
        log::debug!(
            "[handlespace] registered {}/${:08x} (home ${:08x})",
            pool_handle,
            element.identifier,
            element.home_registrar_identifier
        );
        Ok(handle)
    }

    fn insert_element(
        &mut self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
        connection: Option<ConnectionId>,
        now: u64,
    ) -> Result<NodeHandle> {
        let created = !self.pools.contains_key(pool_handle);
        if created {
            self.pools.insert(
                pool_handle.clone(),
                PoolNode::new(
                    pool_handle.clone(),
                    element.policy.policy_type,
                    element.user_transport.protocol,
                    element.user_transport.transport_use,
                ),
            );
        }

        let round = match self.pools.get(pool_handle) {
            Some(pool) if pool.policy_type == PolicyType::WeightedRoundRobin => {
                u32::try_from(pool.min_round()).unwrap_or(0)
            }
            _ => 0,
        };
        let Some(sequence) = self.allocate_sequence(pool_handle) else {
            return Err(self.abandon_pool(pool_handle, created));
        };

        let policy_state = PolicyState::initial(&element.policy, sequence, round);
        let selection_key = sort_key(&element.policy, &policy_state);
        let checksum = pool_element_checksum(
            pool_handle,
            element.identifier,
            element.home_registrar_identifier,
            &element.policy,
        );
        let node = PoolElementNode {
            pool_handle: pool_handle.clone(),
            identifier: element.identifier,
            home_registrar_identifier: element.home_registrar_identifier,
            registration_life: element.registration_life,
            policy_settings: element.policy,
            policy_state,
            user_transport: element.user_transport.clone(),
            registrator_transport: element.registrator_transport.clone(),
            connection,
            timer_time: None,
            timer_code: None,
            last_update: now,
            unreachability_reports: 0,
            checksum,
            selection_key,
        };
        let Some(handle) = self.arena.insert(node) else {
            return Err(self.abandon_pool(pool_handle, created));
        };

        if let Some(pool) = self.pools.get_mut(pool_handle) {
            pool.elements.insert(element.identifier, handle);
            pool.selection.insert((selection_key, handle));
        }
        self.by_owner
            .insert((element.home_registrar_identifier, handle));
        if let Some(conn) = connection {
            self.by_connection.insert((conn, handle));
        }
        self.handlespace_checksum.add(checksum);
        self.ownership_checksums
            .entry(element.home_registrar_identifier)
            .or_default()
            .add(checksum);
        Ok(handle)
    }

    /// Drop a pool created for an insert that failed.
    fn abandon_pool(&mut self, pool_handle: &PoolHandle, created: bool) -> RspError {
        if created {
            self.pools.remove(pool_handle);
        }
        RspError::OutOfMemory
    }

    fn update_element(
        &mut self,
        handle: NodeHandle,
        element: &PoolElementParameter,
        connection: Option<ConnectionId>,
        now: u64,
    ) -> Result<()> {
        let node = self.arena.get(handle).ok_or(RspError::NotFound)?;
        let old_checksum = node.checksum;
        let old_home = node.home_registrar_identifier;
        let old_connection = node.connection;
        let old_key = node.selection_key;
        let settings_changed = node.policy_settings != element.policy;
        let pool_handle = node.pool_handle.clone();

        let new_checksum = pool_element_checksum(
            &pool_handle,
            element.identifier,
            element.home_registrar_identifier,
            &element.policy,
        );
        let new_home = element.home_registrar_identifier;

        self.handlespace_checksum.remove(old_checksum);
        self.handlespace_checksum.add(new_checksum);
        self.ownership_checksums
            .entry(old_home)
            .or_default()
            .remove(old_checksum);
        self.ownership_checksums
            .entry(new_home)
            .or_default()
            .add(new_checksum);
        if old_home != new_home {
            self.by_owner.remove(&(old_home, handle));
            self.by_owner.insert((new_home, handle));
        }
        if old_connection != connection {
            if let Some(conn) = old_connection {
                self.by_connection.remove(&(conn, handle));
            }
            if let Some(conn) = connection {
                self.by_connection.insert((conn, handle));
            }
        }

        let node = self.arena.get_mut(handle).ok_or(RspError::NotFound)?;
        node.home_registrar_identifier = new_home;
        node.registration_life = element.registration_life;
        node.user_transport = element.user_transport.clone();
        node.registrator_transport = element.registrator_transport.clone();
        node.connection = connection;
        node.last_update = now;
        node.checksum = new_checksum;
        if settings_changed {
            let previous = node.policy_state;
            node.policy_settings = element.policy;
            node.policy_state = PolicyState::initial(
                &element.policy,
                previous.sequence_number,
                previous.round_counter,
            );
            node.policy_state.selection_counter = previous.selection_counter;
        }
        let new_key = sort_key(&node.policy_settings, &node.policy_state);
        node.selection_key = new_key;

        if new_key != old_key {
            if let Some(pool) = self.pools.get_mut(&pool_handle) {
                pool.selection.remove(&(old_key, handle));
                pool.selection.insert((new_key, handle));
            }
        }
        Ok(())
    }

    /// Remove a pool element from every index.
    ///
    /// # Errors
    /// `NotFound` if the pool or element is absent.
    pub fn deregister_pool_element(
        &mut self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> Result<PoolElementNode> {
        let handle = self
            .find_handle(pool_handle, identifier)
            .ok_or(RspError::NotFound)?;
        let node = self.remove_node(handle).ok_or(RspError::NotFound)?;
        log::debug!(
            "[handlespace] deregistered {}/${:08x}",
            pool_handle,
            identifier
        );
        Ok(node)
    }

    fn remove_node(&mut self, handle: NodeHandle) -> Option<PoolElementNode> {
        let node = self.arena.remove(handle)?;
        let pool_now_empty = match self.pools.get_mut(&node.pool_handle) {
            Some(pool) => {
                pool.elements.remove(&node.identifier);
                pool.selection.remove(&(node.selection_key, handle));
                pool.is_empty()
            }
            None => false,
        };
        if pool_now_empty {
            self.pools.remove(&node.pool_handle);
        }
        self.by_owner
            .remove(&(node.home_registrar_identifier, handle));
        if let Some(conn) = node.connection {
            self.by_connection.remove(&(conn, handle));
        }
        if let Some(t) = node.timer_time {
            self.timers.remove(&(t, handle));
        }
        self.handlespace_checksum.remove(node.checksum);
        if let Some(acc) = self
            .ownership_checksums
            .get_mut(&node.home_registrar_identifier)
        {
            acc.remove(node.checksum);
        }
        Some(node)
    }

    /// Point an element at a new home registrar.
    pub fn update_home_registrar(
        &mut self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
        home: RegistrarIdentifier,
    ) -> Result<()> {
        let handle = self
            .find_handle(pool_handle, identifier)
            .ok_or(RspError::NotFound)?;
        let node = self.arena.get(handle).ok_or(RspError::NotFound)?;
        if node.home_registrar_identifier == home {
            return Ok(());
        }
        let mut parameter = node.to_parameter();
        parameter.home_registrar_identifier = home;
        let (connection, now) = (node.connection, node.last_update);
        self.update_element(handle, &parameter, connection, now)
    }

    /// Count one more unreachability report against an element.
    pub fn record_unreachability(
        &mut self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> Result<u32> {
        let handle = self
            .find_handle(pool_handle, identifier)
            .ok_or(RspError::NotFound)?;
        let node = self.arena.get_mut(handle).ok_or(RspError::NotFound)?;
        node.unreachability_reports = node.unreachability_reports.saturating_add(1);
        Ok(node.unreachability_reports)
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    pub fn find_handle(
        &self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> Option<NodeHandle> {
        self.pools.get(pool_handle)?.handle_of(identifier)
    }

    pub fn find_pool_element(
        &self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> Option<&PoolElementNode> {
        self.arena.get(self.find_handle(pool_handle, identifier)?)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&PoolElementNode> {
        self.arena.get(handle)
    }

    pub fn pool(&self, pool_handle: &PoolHandle) -> Option<&PoolNode> {
        self.pools.get(pool_handle)
    }

    // ------------------------------------------------------------------------
    // Handle resolution
    // ------------------------------------------------------------------------

    /// Select up to `max_items` elements of a pool according to its policy.
    ///
    /// The first `max_increment` selected elements get their policy update
    /// (rotation, degradation, round counters). The returned order is the
    /// load-balancing decision.
    ///
    /// # Errors
    /// `NotFound` if the pool is absent or empty.
    pub fn select_pool_elements(
        &mut self,
        pool_handle: &PoolHandle,
        max_items: usize,
        max_increment: usize,
    ) -> Result<Vec<NodeHandle>> {
        let pool = self.pools.get(pool_handle).ok_or(RspError::NotFound)?;
        if pool.is_empty() {
            return Err(RspError::NotFound);
        }
        let policy_type = pool.policy_type;

        let selected: Vec<NodeHandle> = match policy_type.strategy() {
            SelectionStrategy::SortingOrder => pool.selection_order().take(max_items).collect(),
            SelectionStrategy::ValueTree => {
                let arena = &self.arena;
                let candidates: Vec<(NodeHandle, u64)> = pool
                    .selection_order()
                    .filter_map(|h| {
                        arena
                            .get(h)
                            .map(|n| (h, sampling_weight(&n.policy_settings, &n.policy_state)))
                    })
                    .collect();
                sampling::sample_without_replacement(candidates, max_items, &mut self.rng)
            }
        };

        for handle in selected.iter().take(max_increment) {
            self.apply_selection_update(pool_handle, *handle);
        }
        if policy_type == PolicyType::WeightedRoundRobin {
            self.normalize_rounds(pool_handle);
        }
        Ok(selected)
    }

    /// [`select_pool_elements`](Self::select_pool_elements) returning the nodes.
    pub fn handle_resolution(
        &mut self,
        pool_handle: &PoolHandle,
        max_items: usize,
        max_increment: usize,
    ) -> Result<Vec<&PoolElementNode>> {
        let selected = self.select_pool_elements(pool_handle, max_items, max_increment)?;
        Ok(selected
            .into_iter()
            .filter_map(|h| self.arena.get(h))
            .collect())
    }

    fn apply_selection_update(&mut self, pool_handle: &PoolHandle, handle: NodeHandle) {
        let Some(sequence) = self.allocate_sequence(pool_handle) else {
            return;
        };
        let Some(node) = self.arena.get_mut(handle) else {
            return;
        };
        let old_key = node.selection_key;
        apply_selection(&node.policy_settings, &mut node.policy_state, sequence);
        let new_key = sort_key(&node.policy_settings, &node.policy_state);
        node.selection_key = new_key;
        if let Some(pool) = self.pools.get_mut(pool_handle) {
            pool.selection.remove(&(old_key, handle));
            pool.selection.insert((new_key, handle));
        }
    }

    /// Next sequence number of a pool, resequencing it first if exhausted.
    fn allocate_sequence(&mut self, pool_handle: &PoolHandle) -> Option<u64> {
        let pool = self.pools.get_mut(pool_handle)?;
        if let Some(sequence) = pool.take_sequence() {
            return Some(sequence);
        }

        log::debug!("[handlespace] resequencing pool {}", pool_handle);
        let order: Vec<NodeHandle> = pool.selection_order().collect();
        pool.reset_sequence();
        pool.selection.clear();
        for handle in order {
            let sequence = pool.take_sequence()?;
            if let Some(node) = self.arena.get_mut(handle) {
                node.policy_state.sequence_number = sequence;
                node.selection_key = sort_key(&node.policy_settings, &node.policy_state);
                pool.selection.insert((node.selection_key, handle));
            }
        }
        pool.take_sequence()
    }

    /// Shift round counters down once any of them nears overflow.
    fn normalize_rounds(&mut self, pool_handle: &PoolHandle) {
        let Some(pool) = self.pools.get_mut(pool_handle) else {
            return;
        };
        let max_round = pool
            .selection
            .iter()
            .map(|(key, _)| key.primary)
            .max()
            .unwrap_or(0);
        if max_round < u64::from(ROUND_COUNTER_RESET_THRESHOLD) {
            return;
        }
        let min_round = u32::try_from(pool.min_round()).unwrap_or(0);
        log::debug!(
            "[handlespace] resetting round counters of {} by {}",
            pool_handle,
            min_round
        );
        for (_, handle) in std::mem::take(&mut pool.selection) {
            if let Some(node) = self.arena.get_mut(handle) {
                node.policy_state.round_counter -= min_round;
                node.selection_key = sort_key(&node.policy_settings, &node.policy_state);
                pool.selection.insert((node.selection_key, handle));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Schedule (or reschedule) an element's single timer.
    pub fn schedule_timer(&mut self, handle: NodeHandle, code: TimerCode, at: u64) -> Result<()> {
        let node = self.arena.get_mut(handle).ok_or(RspError::NotFound)?;
        if let Some(previous) = node.timer_time.replace(at) {
            self.timers.remove(&(previous, handle));
        }
        node.timer_code = Some(code);
        self.timers.insert((at, handle));
        Ok(())
    }

    pub fn cancel_timer(&mut self, handle: NodeHandle) {
        if let Some(node) = self.arena.get_mut(handle) {
            if let Some(previous) = node.timer_time.take() {
                self.timers.remove(&(previous, handle));
            }
            node.timer_code = None;
        }
    }

    /// Restart an element's expiry timer at `now + timeout_us`.
    pub fn restart_expiry_timer(
        &mut self,
        handle: NodeHandle,
        timeout_us: u64,
        now: u64,
    ) -> Result<()> {
        self.schedule_timer(handle, TimerCode::Expiry, now.saturating_add(timeout_us))
    }

    /// Earliest pending timer timestamp.
    pub fn next_timer(&self) -> Option<u64> {
        self.timers.iter().next().map(|(t, _)| *t)
    }

    /// Elements whose timer is due at `now`, earliest first.
    pub fn due_timers(&self, now: u64) -> Vec<(NodeHandle, TimerCode)> {
        self.timers
            .iter()
            .take_while(|(t, _)| *t <= now)
            .filter_map(|(_, h)| {
                let code = self.arena.get(*h)?.timer_code?;
                Some((*h, code))
            })
            .collect()
    }

    /// Remove every element whose expiry timer is due at `now`.
    ///
    /// Walks the timer index from the earliest entry and stops at the first
    /// one in the future. Returns the number of removed elements.
    pub fn purge_expired_pool_elements(&mut self, now: u64) -> usize {
        let expired: Vec<NodeHandle> = self
            .due_timers(now)
            .into_iter()
            .filter(|(_, code)| *code == TimerCode::Expiry)
            .map(|(h, _)| h)
            .collect();
        let mut count = 0;
        for handle in expired {
            if let Some(node) = self.remove_node(handle) {
                log::debug!(
                    "[handlespace] expired {}/${:08x}",
                    node.pool_handle,
                    node.identifier
                );
                count += 1;
            }
        }
        count
    }

    // ------------------------------------------------------------------------
    // Checksums
    // ------------------------------------------------------------------------

    pub fn handlespace_checksum(&self) -> Checksum {
        self.handlespace_checksum.value()
    }

    /// Checksum over the elements owned by `registrar`.
    pub fn ownership_checksum(&self, registrar: RegistrarIdentifier) -> Checksum {
        self.ownership_checksums
            .get(&registrar)
            .map(|acc| acc.value())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pool_element_count(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn pool_handles(&self) -> Vec<PoolHandle> {
        self.pools.keys().cloned().collect()
    }

    /// Elements of a pool in identifier order.
    pub fn pool_elements<'a>(
        &'a self,
        pool_handle: &PoolHandle,
    ) -> impl Iterator<Item = &'a PoolElementNode> + 'a {
        self.pools
            .get(pool_handle)
            .into_iter()
            .flat_map(|pool| pool.elements.values())
            .filter_map(|h| self.arena.get(*h))
    }

    /// All elements, by pool handle then identifier.
    pub fn iter(&self) -> impl Iterator<Item = &PoolElementNode> + '_ {
        self.pools
            .values()
            .flat_map(|pool| pool.elements.values())
            .filter_map(|h| self.arena.get(*h))
    }

    pub fn pool_element_handles_of_owner(&self, registrar: RegistrarIdentifier) -> Vec<NodeHandle> {
        self.by_owner
            .range((registrar, NodeHandle::MIN)..=(registrar, NodeHandle::MAX))
            .map(|(_, h)| *h)
            .collect()
    }

    pub fn pool_element_handles_of_connection(&self, connection: ConnectionId) -> Vec<NodeHandle> {
        self.by_connection
            .range((connection, NodeHandle::MIN)..=(connection, NodeHandle::MAX))
            .map(|(_, h)| *h)
            .collect()
    }

    /// Remove a whole pool; returns the number of removed elements.
    pub fn remove_pool(&mut self, pool_handle: &PoolHandle) -> usize {
        let handles: Vec<NodeHandle> = match self.pools.get(pool_handle) {
            Some(pool) => pool.elements.values().copied().collect(),
            None => return 0,
        };
        handles
            .into_iter()
            .filter_map(|h| self.remove_node(h))
            .count()
    }

    /// Remove an element by handle.
    pub fn remove(&mut self, handle: NodeHandle) -> Option<PoolElementNode> {
        self.remove_node(handle)
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        let handles: Vec<NodeHandle> = self.arena.iter().map(|(h, _)| h).collect();
        for handle in handles {
            self.remove_node(handle);
        }
        self.ownership_checksums.clear();
    }

    /// Recompute index cardinalities, selection keys and checksums from
    /// scratch and compare them with the maintained state.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let total = self.arena.len();
        let in_pools: usize = self.pools.values().map(|p| p.elements.len()).sum();
        if in_pools != total {
            return Err(format!("pool index holds {} of {} elements", in_pools, total));
        }
        if self.by_owner.len() != total {
            return Err(format!(
                "owner index holds {} of {} elements",
                self.by_owner.len(),
                total
            ));
        }
        let connected = self.arena.iter().filter(|(_, n)| n.connection.is_some()).count();
        if self.by_connection.len() != connected {
            return Err(format!(
                "connection index holds {}, expected {}",
                self.by_connection.len(),
                connected
            ));
        }
        let timed = self.arena.iter().filter(|(_, n)| n.timer_time.is_some()).count();
        if self.timers.len() != timed {
            return Err(format!(
                "timer index holds {}, expected {}",
                self.timers.len(),
                timed
            ));
        }

        let mut handlespace = ChecksumAccumulator::default();
        let mut ownership: HashMap<RegistrarIdentifier, ChecksumAccumulator> = HashMap::new();
        for (handle_key, pool) in &self.pools {
            if pool.is_empty() {
                return Err(format!("empty pool {} kept", handle_key));
            }
            if pool.selection.len() != pool.elements.len() {
                return Err(format!("selection index of {} out of sync", handle_key));
            }
            for (identifier, handle) in &pool.elements {
                let node = self
                    .arena
                    .get(*handle)
                    .ok_or_else(|| format!("dangling handle in {}", handle_key))?;
                if node.identifier != *identifier || &node.pool_handle != handle_key {
                    return Err(format!("misfiled element ${:08x}", identifier));
                }
                let key = sort_key(&node.policy_settings, &node.policy_state);
                if key != node.selection_key || !pool.selection.contains(&(key, *handle)) {
                    return Err(format!("stale selection key for ${:08x}", identifier));
                }
                if !self
                    .by_owner
                    .contains(&(node.home_registrar_identifier, *handle))
                {
                    return Err(format!("owner index misses ${:08x}", identifier));
                }
                let checksum = pool_element_checksum(
                    &node.pool_handle,
                    node.identifier,
                    node.home_registrar_identifier,
                    &node.policy_settings,
                );
                if checksum != node.checksum {
                    return Err(format!("stale checksum for ${:08x}", identifier));
                }
                handlespace.add(checksum);
                ownership
                    .entry(node.home_registrar_identifier)
                    .or_default()
                    .add(checksum);
            }
        }
        if handlespace.value() != self.handlespace_checksum() {
            return Err(format!(
                "handlespace checksum {:04x} != recomputed {:04x}",
                self.handlespace_checksum(),
                handlespace.value()
            ));
        }
        for (owner, acc) in &ownership {
            if acc.value() != self.ownership_checksum(*owner) {
                return Err(format!("ownership checksum of ${:08x} diverged", owner));
            }
        }
        for (owner, acc) in &self.ownership_checksums {
            if !ownership.contains_key(owner) && acc.value() != 0 {
                return Err(format!("ownership checksum of ${:08x} not zero", owner));
            }
        }
        Ok(())
    }
}
