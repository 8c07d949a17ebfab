// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registrar hunt.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::RegistrarTable;
use crate::clock::Clock;
use crate::error::{Result, RspError};
use crate::transport::{ConnectionId, Transport};
use crate::types::RegistrarIdentifier;

/// Sleep granularity while waiting for a registrar to be announced.
const ANNOUNCE_WAIT_STEP: Duration = Duration::from_millis(50);

/// Hunt parameters (taken from `AsapConfig`).
#[derive(Debug, Clone)]
pub struct HuntSettings {
    pub connect_max_trials: u32,
    pub connect_timeout: Duration,
    pub parallelism: usize,
}

/// Result of a successful hunt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HuntOutcome {
    pub connection: ConnectionId,
    /// Zero when the registrar has not announced its identifier yet.
    pub registrar_identifier: RegistrarIdentifier,
    pub address: SocketAddr,
}

/// Establish a connection to some registrar.
///
/// Each trial takes a fresh candidate list from `table` and lets the
/// transport race up to `parallelism` connects. A trial that fails while a
/// new registrar was learned is repeated without counting against
/// `connect_max_trials`, so the newly announced registrar is tried first.
///
/// # Errors
/// `NoRegistrar` once all trials failed, `Aborted` if `cancelled` is set.
pub fn find_registrar(
    table: &Mutex<RegistrarTable>,
    transport: &dyn Transport,
    settings: &HuntSettings,
    clock: &dyn Clock,
    cancelled: &AtomicBool,
) -> Result<HuntOutcome> {
    let mut trial = 0;
    while trial < settings.connect_max_trials.max(1) {
        if cancelled.load(Ordering::Acquire) {
            return Err(RspError::Aborted);
        }
        let (candidates, generation) = {
            let mut table = table.lock();
            table.purge_expired(clock.now());
            (table.candidates(), table.generation())
        };

        if candidates.is_empty() {
            log::debug!(
                "[asap] hunt trial {}: no registrar known, waiting for announce",
                trial + 1
            );
            if !wait_for_new_registrar(table, generation, settings.connect_timeout, cancelled) {
                trial += 1;
            }
            continue;
        }

        log::debug!(
            "[asap] hunt trial {}: {} candidate(s)",
            trial + 1,
            candidates.len()
        );
        match transport.connect(&candidates, settings.parallelism, settings.connect_timeout) {
            Ok((connection, address)) => {
                let registrar_identifier = table.lock().identify(&address);
                log::debug!(
                    "[asap] connected to registrar ${:08x} at {}",
                    registrar_identifier,
                    address
                );
                return Ok(HuntOutcome {
                    connection,
                    registrar_identifier,
                    address,
                });
            }
            Err(e) => {
                log::debug!("[asap] hunt trial {} failed: {}", trial + 1, e);
                if table.lock().generation() == generation {
                    trial += 1;
                }
            }
        }
    }
    log::warn!("[asap] registrar hunt failed");
    Err(RspError::NoRegistrar)
}

/// Wait up to `timeout` for the table to learn a new registrar.
fn wait_for_new_registrar(
    table: &Mutex<RegistrarTable>,
    generation: u64,
    timeout: Duration,
    cancelled: &AtomicBool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if table.lock().generation() != generation {
            return true;
        }
        let now = Instant::now();
        if now >= deadline || cancelled.load(Ordering::Acquire) {
            return false;
        }
        thread::sleep(ANNOUNCE_WAIT_STEP.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::TcpTransport;
    use crate::types::TransportAddressBlock;
    use std::net::TcpListener;

    fn settings() -> HuntSettings {
        HuntSettings {
            connect_max_trials: 2,
            connect_timeout: Duration::from_millis(300),
            parallelism: 3,
        }
    }

    #[test]
    fn test_hunt_identifies_registrar() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let table = Mutex::new(RegistrarTable::new(5_000_000));
        table
            .lock()
            .register_peer_from_announce(0x77, TransportAddressBlock::tcp(addr), 0);

        let transport = TcpTransport::new();
        let outcome = find_registrar(
            &table,
            &transport,
            &settings(),
            &ManualClock::new(1),
            &AtomicBool::new(false),
        )
        .unwrap();
        assert_eq!(outcome.address, addr);
        assert_eq!(outcome.registrar_identifier, 0x77);
    }

    #[test]
    fn test_hunt_without_registrars_fails() {
        let table = Mutex::new(RegistrarTable::new(5_000_000));
        let transport = TcpTransport::new();
        let result = find_registrar(
            &table,
            &transport,
            &settings(),
            &ManualClock::new(1),
            &AtomicBool::new(false),
        );
        assert_eq!(result, Err(RspError::NoRegistrar));
    }

    #[test]
    fn test_hunt_cancelled() {
        let table = Mutex::new(RegistrarTable::new(5_000_000));
        let transport = TcpTransport::new();
        let result = find_registrar(
            &table,
            &transport,
            &settings(),
            &ManualClock::new(1),
            &AtomicBool::new(true),
        );
        assert_eq!(result, Err(RspError::Aborted));
    }
}
