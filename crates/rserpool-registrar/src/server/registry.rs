// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pool registry: the registrar's handlespace and the ASAP request logic on top of it.

use rserpool::handlespace::{ConnectionId, PoolHandlespace, TimerCode};
use rserpool::message::constants::{AEC_INVALID_VALUES, AEC_NONUNIQUE_PE_ID};
use rserpool::{
    OperationError, PoolElementIdentifier, PoolElementParameter, PoolHandle, RegistrarIdentifier,
    RserpoolMessage, RspError,
};
use tracing::{debug, info, warn};

use crate::config::RegistrarConfig;

/// Registry limits, copied out of [`RegistrarConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub keep_alive_transmission_interval_us: u64,
    pub keep_alive_timeout_us: u64,
    pub max_bad_pe_reports: u32,
    pub default_handle_resolution_items: usize,
    pub max_handle_resolution_items: usize,
    pub max_registration_life_ms: u32,
}

impl From<&RegistrarConfig> for RegistryLimits {
    fn from(config: &RegistrarConfig) -> Self {
        Self {
            keep_alive_transmission_interval_us: config.keep_alive_transmission_interval_us(),
            keep_alive_timeout_us: config.keep_alive_timeout_us(),
            max_bad_pe_reports: config.max_bad_pe_reports,
            default_handle_resolution_items: config.default_handle_resolution_items,
            max_handle_resolution_items: config.max_handle_resolution_items,
            max_registration_life_ms: config.max_registration_life_ms,
        }
    }
}

/// Work produced by a timer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerAction {
    /// Send a keep-alive over the element's registration connection.
    KeepAlive {
        connection: ConnectionId,
        message: RserpoolMessage,
    },
    /// The element did not acknowledge in time and was removed.
    Expired {
        pool_handle: PoolHandle,
        identifier: PoolElementIdentifier,
    },
}

/// Registered pool elements of one registrar.
pub struct PoolRegistry {
    identifier: RegistrarIdentifier,
    handlespace: PoolHandlespace,
    limits: RegistryLimits,
}

impl PoolRegistry {
    pub fn new(identifier: RegistrarIdentifier, limits: RegistryLimits) -> Self {
        Self {
            identifier,
            handlespace: PoolHandlespace::new(),
            limits,
        }
    }

    pub fn identifier(&self) -> RegistrarIdentifier {
        self.identifier
    }

    pub fn handlespace(&self) -> &PoolHandlespace {
        &self.handlespace
    }

    pub fn pool_element_count(&self) -> usize {
        self.handlespace.pool_element_count()
    }

    /// Handle REGISTRATION received over `connection`.
    pub fn register(
        &mut self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
        connection: ConnectionId,
        now: u64,
    ) -> RserpoolMessage {
        let error = match self.try_register(pool_handle, element, connection, now) {
            Ok(()) => {
                info!(
                    "Registered {}/${:08x} at {}",
                    pool_handle, element.identifier, element.user_transport
                );
                None
            }
            Err(e) => {
                warn!(
                    "Rejected registration of {}/${:08x}: {}",
                    pool_handle, element.identifier, e
                );
                Some(OperationError::new(registration_cause(&e)))
            }
        };
        RserpoolMessage::RegistrationResponse {
            pool_handle: pool_handle.clone(),
            identifier: element.identifier,
            error,
        }
    }

    fn try_register(
        &mut self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
        connection: ConnectionId,
        now: u64,
    ) -> rserpool::Result<()> {
        if element.identifier == 0 {
            return Err(RspError::RegistrarRejected {
                cause: AEC_INVALID_VALUES,
            });
        }
        if element
            .user_transport
            .addresses
            .iter()
            .all(|ip| ip.is_unspecified() || ip.is_multicast())
        {
            return Err(RspError::NoUsableUserAddresses);
        }

        let mut element = element.clone();
        element.home_registrar_identifier = self.identifier;
        element.registration_life = element
            .registration_life
            .min(self.limits.max_registration_life_ms);

        if let Some(existing) = self
            .handlespace
            .find_pool_element(pool_handle, element.identifier)
        {
            existing.check_compatibility(&element)?;
        }
        let handle = self
            .handlespace
            .register_pool_element(pool_handle, &element, Some(connection), now)?;
        self.handlespace.schedule_timer(
            handle,
            TimerCode::KeepAliveTransmission,
            now.saturating_add(self.limits.keep_alive_transmission_interval_us),
        )
    }

    /// Handle DEREGISTRATION. Unknown elements are treated as already gone.
    pub fn deregister(
        &mut self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> RserpoolMessage {
        match self.handlespace.deregister_pool_element(pool_handle, identifier) {
            Ok(_) => info!("Deregistered {}/${:08x}", pool_handle, identifier),
            Err(_) => debug!(
                "Deregistration of unknown element {}/${:08x}",
                pool_handle, identifier
            ),
        }
        RserpoolMessage::DeregistrationResponse {
            pool_handle: pool_handle.clone(),
            identifier,
            error: None,
        }
    }

    /// Handle HANDLE_RESOLUTION.
    pub fn handle_resolution(
        &mut self,
        pool_handle: &PoolHandle,
        items: Option<u32>,
    ) -> RserpoolMessage {
        let wanted = items
            .map_or(self.limits.default_handle_resolution_items, |n| n as usize)
            .clamp(1, self.limits.max_handle_resolution_items);
        match self
            .handlespace
            .handle_resolution(pool_handle, wanted, wanted)
        {
            Ok(nodes) => {
                let elements: Vec<PoolElementParameter> =
                    nodes.iter().map(|n| n.to_parameter()).collect();
                debug!(
                    "Resolved {} to {} of {} requested element(s)",
                    pool_handle,
                    elements.len(),
                    wanted
                );
                RserpoolMessage::HandleResolutionResponse {
                    pool_handle: pool_handle.clone(),
                    policy: elements.first().map(|pe| pe.policy),
                    elements,
                    error: None,
                }
            }
            Err(e) => {
                debug!("Handle resolution of {} failed: {}", pool_handle, e);
                RserpoolMessage::HandleResolutionResponse {
                    pool_handle: pool_handle.clone(),
                    policy: None,
                    elements: Vec::new(),
                    error: Some(OperationError::new(e.to_cause())),
                }
            }
        }
    }

    /// Handle ENDPOINT_UNREACHABLE. Returns true if the element was removed.
    pub fn report_unreachable(
        &mut self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> bool {
        let Ok(reports) = self.handlespace.record_unreachability(pool_handle, identifier) else {
            debug!(
                "Unreachability report for unknown element {}/${:08x}",
                pool_handle, identifier
            );
            return false;
        };
        if reports < self.limits.max_bad_pe_reports {
            debug!(
                "{}/${:08x} reported unreachable ({}/{})",
                pool_handle, identifier, reports, self.limits.max_bad_pe_reports
            );
            return false;
        }
        info!(
            "Removing {}/${:08x} after {} unreachability reports",
            pool_handle, identifier, reports
        );
        self.handlespace
            .deregister_pool_element(pool_handle, identifier)
            .is_ok()
    }

    /// Handle ENDPOINT_KEEP_ALIVE_ACK: schedule the next keep-alive.
    pub fn keep_alive_ack(
        &mut self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
        now: u64,
    ) -> bool {
        let Some(handle) = self.handlespace.find_handle(pool_handle, identifier) else {
            debug!(
                "Keep-alive ack for unknown element {}/${:08x}",
                pool_handle, identifier
            );
            return false;
        };
        self.handlespace
            .schedule_timer(
                handle,
                TimerCode::KeepAliveTransmission,
                now.saturating_add(self.limits.keep_alive_transmission_interval_us),
            )
            .is_ok()
    }

    /// Remove every element registered over `connection`.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let handles = self
            .handlespace
            .pool_element_handles_of_connection(connection);
        let mut removed = 0;
        for handle in handles {
            if let Some(node) = self.handlespace.remove(handle) {
                info!(
                    "Removed {}/${:08x} (connection closed)",
                    node.pool_handle, node.identifier
                );
                removed += 1;
            }
        }
        removed
    }

    /// Run every timer due at `now`.
    pub fn process_timers(&mut self, now: u64) -> Vec<TimerAction> {
        let mut actions = Vec::new();
        for (handle, code) in self.handlespace.due_timers(now) {
            let Some(node) = self.handlespace.get(handle) else {
                continue;
            };
            let pool_handle = node.pool_handle.clone();
            let identifier = node.identifier;
            let connection = node.connection;
            match code {
                TimerCode::KeepAliveTransmission => {
                    let deadline = now.saturating_add(self.limits.keep_alive_timeout_us);
                    if self
                        .handlespace
                        .schedule_timer(handle, TimerCode::KeepAliveTimeout, deadline)
                        .is_err()
                    {
                        continue;
                    }
                    if let Some(connection) = connection {
                        actions.push(TimerAction::KeepAlive {
                            connection,
                            message: RserpoolMessage::EndpointKeepAlive {
                                registrar_identifier: self.identifier,
                                home: true,
                                pool_handle,
                                identifier: Some(identifier),
                            },
                        });
                    }
                }
                TimerCode::KeepAliveTimeout | TimerCode::Expiry => {
                    warn!(
                        "{}/${:08x} stopped answering keep-alives, removing",
                        pool_handle, identifier
                    );
                    self.handlespace.remove(handle);
                    actions.push(TimerAction::Expired {
                        pool_handle,
                        identifier,
                    });
                }
            }
        }
        actions
    }

    /// Timestamp of the next timer, if any.
    pub fn next_timer(&self) -> Option<u64> {
        self.handlespace.next_timer()
    }
}

/// Operation-error cause reported for a failed registration.
fn registration_cause(error: &RspError) -> u16 {
    match error {
        RspError::IncompatibleReregistration => AEC_NONUNIQUE_PE_ID,
        other => other.to_cause(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rserpool::message::constants::{
        AEC_INCONSISTENT_POOL_POLICY, AEC_NO_USABLE_USER_ADDRESSES, AEC_UNKNOWN_POOL_HANDLE,
    };
    use rserpool::{PolicySettings, TransportAddressBlock};

    const SECOND: u64 = 1_000_000;

    fn limits() -> RegistryLimits {
        RegistryLimits {
            keep_alive_transmission_interval_us: SECOND,
            keep_alive_timeout_us: SECOND / 2,
            max_bad_pe_reports: 2,
            default_handle_resolution_items: 1,
            max_handle_resolution_items: 4,
            max_registration_life_ms: 10_000,
        }
    }

    fn element(identifier: u32, policy: PolicySettings) -> PoolElementParameter {
        PoolElementParameter {
            identifier,
            home_registrar_identifier: 0,
            registration_life: 60_000,
            user_transport: TransportAddressBlock::tcp(
                format!("10.0.0.{}:7", identifier).parse().unwrap(),
            ),
            policy,
            registrator_transport: None,
        }
    }

    fn error_cause(response: &RserpoolMessage) -> Option<u16> {
        match response {
            RserpoolMessage::RegistrationResponse { error, .. }
            | RserpoolMessage::DeregistrationResponse { error, .. }
            | RserpoolMessage::HandleResolutionResponse { error, .. } => {
                error.as_ref().map(|e| e.cause)
            }
            _ => panic!("not a response"),
        }
    }

    #[test]
    fn test_registration_sets_home_and_caps_life() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(0x77, limits());
        let response = registry.register(&pool, &element(1, PolicySettings::round_robin()), 9, 0);
        assert_eq!(error_cause(&response), None);

        let node = registry.handlespace().find_pool_element(&pool, 1).unwrap();
        assert_eq!(node.home_registrar_identifier, 0x77);
        assert_eq!(node.registration_life, 10_000);
        assert_eq!(node.connection, Some(9));
        assert_eq!(registry.next_timer(), Some(SECOND));
    }

    #[test]
    fn test_registration_rejections() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(1, limits());
        registry.register(&pool, &element(1, PolicySettings::round_robin()), 1, 0);

        let response =
            registry.register(&pool, &element(2, PolicySettings::least_used(0)), 1, 0);
        assert_eq!(error_cause(&response), Some(AEC_INCONSISTENT_POOL_POLICY));

        let mut unusable = element(3, PolicySettings::round_robin());
        unusable.user_transport =
            TransportAddressBlock::tcp("0.0.0.0:7".parse().unwrap());
        let response = registry.register(&pool, &unusable, 1, 0);
        assert_eq!(error_cause(&response), Some(AEC_NO_USABLE_USER_ADDRESSES));

        let response = registry.register(&pool, &element(0, PolicySettings::round_robin()), 1, 0);
        assert_eq!(error_cause(&response), Some(AEC_INVALID_VALUES));
        assert_eq!(registry.pool_element_count(), 1);
    }

    #[test]
    fn test_incompatible_reregistration_is_rejected() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(1, limits());
        registry.register(&pool, &element(1, PolicySettings::weighted_random(2)), 1, 0);
        let response =
            registry.register(&pool, &element(1, PolicySettings::weighted_random(5)), 1, 0);
        assert_eq!(error_cause(&response), None);
        let response = registry.register(&pool, &element(1, PolicySettings::random()), 1, 0);
        assert_eq!(error_cause(&response), Some(AEC_NONUNIQUE_PE_ID));
    }

    #[test]
    fn test_handle_resolution_limits() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(1, limits());
        for id in 1..=6 {
            registry.register(&pool, &element(id, PolicySettings::round_robin()), 1, 0);
        }
        let count = |response: RserpoolMessage| match response {
            RserpoolMessage::HandleResolutionResponse { elements, .. } => elements.len(),
            _ => panic!("not a handle resolution response"),
        };
        assert_eq!(count(registry.handle_resolution(&pool, None)), 1);
        assert_eq!(count(registry.handle_resolution(&pool, Some(3))), 3);
        assert_eq!(count(registry.handle_resolution(&pool, Some(100))), 4);

        let missing = PoolHandle::try_from("Q").unwrap();
        assert_eq!(
            error_cause(&registry.handle_resolution(&missing, Some(1))),
            Some(AEC_UNKNOWN_POOL_HANDLE)
        );
    }

    #[test]
    fn test_unreachable_reports_remove_element() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(1, limits());
        registry.register(&pool, &element(1, PolicySettings::round_robin()), 1, 0);
        assert!(!registry.report_unreachable(&pool, 1));
        assert!(registry.report_unreachable(&pool, 1));
        assert_eq!(registry.pool_element_count(), 0);
        assert!(!registry.report_unreachable(&pool, 1));
    }

    #[test]
    fn test_keep_alive_cycle() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(0x55, limits());
        registry.register(&pool, &element(1, PolicySettings::round_robin()), 4, 0);
        registry.register(&pool, &element(2, PolicySettings::round_robin()), 5, 0);

        assert!(registry.process_timers(SECOND - 1).is_empty());
        let actions = registry.process_timers(SECOND);
        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&TimerAction::KeepAlive {
            connection: 4,
            message: RserpoolMessage::EndpointKeepAlive {
                registrar_identifier: 0x55,
                home: true,
                pool_handle: pool.clone(),
                identifier: Some(1),
            },
        }));

        // Only element 1 answers.
        assert!(registry.keep_alive_ack(&pool, 1, SECOND + 10));
        let actions = registry.process_timers(SECOND + SECOND / 2);
        assert_eq!(
            actions,
            vec![TimerAction::Expired {
                pool_handle: pool.clone(),
                identifier: 2,
            }]
        );
        assert_eq!(registry.pool_element_count(), 1);
        assert_eq!(registry.next_timer(), Some(2 * SECOND + 10));
        assert!(registry.handlespace().verify().is_ok());
    }

    #[test]
    fn test_connection_close_removes_its_elements() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(1, limits());
        registry.register(&pool, &element(1, PolicySettings::round_robin()), 7, 0);
        registry.register(&pool, &element(2, PolicySettings::round_robin()), 7, 0);
        registry.register(&pool, &element(3, PolicySettings::round_robin()), 8, 0);
        assert_eq!(registry.remove_connection(7), 2);
        assert_eq!(registry.remove_connection(7), 0);
        assert_eq!(registry.pool_element_count(), 1);
    }

    #[test]
    fn test_deregistration_is_idempotent() {
        let pool = PoolHandle::try_from("P").unwrap();
        let mut registry = PoolRegistry::new(1, limits());
        registry.register(&pool, &element(1, PolicySettings::round_robin()), 1, 0);
        assert_eq!(error_cause(&registry.deregister(&pool, 1)), None);
        assert_eq!(error_cause(&registry.deregister(&pool, 1)), None);
        assert_eq!(registry.pool_element_count(), 0);
    }
}
