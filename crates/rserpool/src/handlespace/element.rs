// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::error::{Result, RspError};
use crate::message::PoolElementParameter;
use crate::policy::{PolicySettings, PolicyState, SortKey};
use crate::types::{
    PoolElementIdentifier, PoolHandle, RegistrarIdentifier, TransportAddressBlock,
};

use super::checksum::Checksum;

/// Identity of the connection a pool element was registered over.
pub type ConnectionId = u64;

/// What an element's pending timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCode {
    /// Registration life or cache staleness ran out.
    Expiry,
    /// Registrar side: time to send the next keep-alive.
    KeepAliveTransmission,
    /// Registrar side: keep-alive sent, acknowledgement overdue.
    KeepAliveTimeout,
}

/// One registered pool element.
#[derive(Debug, Clone)]
pub struct PoolElementNode {
    pub pool_handle: PoolHandle,
    pub identifier: PoolElementIdentifier,
    pub home_registrar_identifier: RegistrarIdentifier,
    /// Registration life in milliseconds.
    pub registration_life: u32,
    pub policy_settings: PolicySettings,
    pub policy_state: PolicyState,
    pub user_transport: TransportAddressBlock,
    pub registrator_transport: Option<TransportAddressBlock>,
    pub connection: Option<ConnectionId>,
    /// Absolute timestamp (µs) of the pending timer, if any.
    pub timer_time: Option<u64>,
    pub timer_code: Option<TimerCode>,
    pub last_update: u64,
    pub unreachability_reports: u32,
    pub(crate) checksum: Checksum,
    pub(crate) selection_key: SortKey,
}

impl PoolElementNode {
    /// This element's checksum contribution.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Wire representation.
    pub fn to_parameter(&self) -> PoolElementParameter {
        PoolElementParameter {
            identifier: self.identifier,
            home_registrar_identifier: self.home_registrar_identifier,
            registration_life: self.registration_life,
            user_transport: self.user_transport.clone(),
            policy: self.policy_settings,
            registrator_transport: self.registrator_transport.clone(),
        }
    }

    /// Check that `update` may replace this element's registration.
    ///
    /// Changing the policy kind or the transport protocol/use of an existing
    /// element is refused.
    pub fn check_compatibility(&self, update: &PoolElementParameter) -> Result<()> {
        if !self.policy_settings.is_compatible(&update.policy) {
            return Err(RspError::IncompatibleReregistration);
        }
        if self.user_transport.protocol != update.user_transport.protocol
            || self.user_transport.transport_use != update.user_transport.transport_use
        {
            return Err(RspError::IncompatibleReregistration);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportProtocol;

    fn parameter(policy: PolicySettings) -> PoolElementParameter {
        PoolElementParameter {
            identifier: 1,
            home_registrar_identifier: 0,
            registration_life: 1000,
            user_transport: TransportAddressBlock::tcp("127.0.0.1:9000".parse().unwrap()),
            policy,
            registrator_transport: None,
        }
    }

    fn node(policy: PolicySettings) -> PoolElementNode {
        let p = parameter(policy);
        PoolElementNode {
            pool_handle: PoolHandle::try_from("P").unwrap(),
            identifier: p.identifier,
            home_registrar_identifier: 0,
            registration_life: p.registration_life,
            policy_settings: p.policy,
            policy_state: PolicyState::default(),
            user_transport: p.user_transport,
            registrator_transport: None,
            connection: None,
            timer_time: None,
            timer_code: None,
            last_update: 0,
            unreachability_reports: 0,
            checksum: 0,
            selection_key: SortKey {
                primary: 0,
                secondary: 0,
                sequence: 0,
            },
        }
    }

    #[test]
    fn test_compatibility() {
        let n = node(PolicySettings::least_used(5));
        assert!(n.check_compatibility(&parameter(PolicySettings::least_used(90))).is_ok());
        assert_eq!(
            n.check_compatibility(&parameter(PolicySettings::priority(1))),
            Err(RspError::IncompatibleReregistration)
        );
        let mut udp = parameter(PolicySettings::least_used(5));
        udp.user_transport.protocol = TransportProtocol::Udp;
        assert_eq!(
            n.check_compatibility(&udp),
            Err(RspError::IncompatibleReregistration)
        );
    }
}
