// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine worker thread.
//!
//! ```text
//! callers --Command--> [pending FIFO] --dispatch--> registrar connection
//!                                         |                |
//!                                    in_flight <--response-+
//!                                         |
//!                                reply port (bounded 1)
//! ```
//!
//! At most one request awaits a response at any time. The worker owns the
//! registrar connection; the handlespaces are shared with callers through
//! `Shared::state`.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{select, Receiver};

use super::request::Request;
use super::{Command, RegistrarConnection, Shared};
use crate::error::{Result, RspError};
use crate::message::constants::*;
use crate::message::{decode, encode, message_type_name, PoolElementParameter, RserpoolMessage};
use crate::registrar::{find_registrar, handle_announce};
use crate::transport::{ConnectionId, Transport, TransportEvent};
use crate::types::{PoolElementIdentifier, PoolHandle, RegistrarIdentifier};

/// Upper bound on one wait so shutdown and manual clocks are noticed.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// What to do with the in-flight request after its response arrived.
#[derive(Debug)]
enum Verdict {
    Accept,
    Reject(RspError),
    /// Reconnect to the same registrar and try again.
    Retry(RspError),
    Violation(String),
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    commands: Receiver<Command>,
    events: Receiver<TransportEvent>,
    pending: VecDeque<Request>,
    in_flight: Option<Request>,
    /// Inbound registrar connections not (yet) used as the registrar connection.
    inbound: HashMap<ConnectionId, SocketAddr>,
}

impl Worker {
    pub fn new(
        shared: Arc<Shared>,
        transport: Arc<dyn Transport>,
        commands: Receiver<Command>,
        events: Receiver<TransportEvent>,
    ) -> Self {
        Self {
            shared,
            transport,
            commands,
            events,
            pending: VecDeque::new(),
            in_flight: None,
            inbound: HashMap::new(),
        }
    }

    pub fn run(mut self) {
        log::debug!("[asap] worker started");
        let commands = self.commands.clone();
        let events = self.events.clone();
        loop {
            if self.shutting_down() {
                break;
            }
            self.dispatch();
            let wait = self.wait_time();
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Submit(request)) => self.pending.push_back(request),
                    Ok(Command::Shutdown) | Err(_) => break,
                },
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => {
                        log::warn!("[asap] transport event channel closed");
                        break;
                    }
                },
                default(wait) => {}
            }
            self.check_timeout();
        }
        self.drain();
        log::debug!("[asap] worker stopped");
    }

    fn shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    fn current_registrar(&self) -> Option<RegistrarConnection> {
        self.shared.state.lock().registrar
    }

    fn wait_time(&self) -> Duration {
        match self.in_flight.as_ref().and_then(|r| r.deadline) {
            Some(deadline) => {
                let now = self.shared.clock.now();
                Duration::from_micros(deadline.saturating_sub(now)).min(IDLE_TICK)
            }
            None => IDLE_TICK,
        }
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Send queued requests until one awaits a response or the queue is empty.
    fn dispatch(&mut self) {
        while self.in_flight.is_none() {
            if self.shutting_down() {
                return;
            }
            let Some(mut request) = self.pending.pop_front() else {
                return;
            };
            if request.trials == 0 {
                self.withdraw_own_element(&request.message);
            }
            let connection = match self.ensure_connection() {
                Ok(connection) => connection,
                Err(e) => {
                    request.trials += 1;
                    self.retry_or_fail(request, e);
                    continue;
                }
            };

            let now = self.shared.clock.now();
            request.trials += 1;
            request.transmitted = Some(now);
            match self.transport.send(connection, PPID_ASAP, &request.payload) {
                Ok(()) => {
                    log::debug!(
                        "[asap] sent {} (trial {})",
                        request.message,
                        request.trials
                    );
                    if request.response_expected() {
                        request.deadline = Some(
                            now.saturating_add(self.shared.config.registrar_response_timeout_us),
                        );
                        self.in_flight = Some(request);
                    }
                }
                Err(e) => {
                    log::debug!("[asap] send of {} failed: {}", request.message, e);
                    self.disconnect();
                    self.retry_or_fail(request, RspError::NoRegistrar);
                }
            }
        }
    }

    fn ensure_connection(&mut self) -> Result<ConnectionId> {
        let current = self.shared.state.lock().registrar.map(|r| r.connection);
        if let Some(connection) = current {
            return Ok(connection);
        }
        let outcome = find_registrar(
            &self.shared.table,
            self.transport.as_ref(),
            &self.shared.config.hunt_settings(),
            self.shared.clock.as_ref(),
            &self.shared.shutdown,
        )?;
        self.shared.state.lock().registrar = Some(RegistrarConnection {
            connection: outcome.connection,
            identifier: outcome.registrar_identifier,
            address: outcome.address,
            connected_at: self.shared.clock.now(),
        });
        Ok(outcome.connection)
    }

    /// Requeue `request` at the head of the line, or fail it once its trials are used up.
    fn retry_or_fail(&mut self, request: Request, error: RspError) {
        if error != RspError::Aborted
            && request.trials < self.shared.config.registrar_request_max_trials
        {
            log::debug!(
                "[asap] retrying {} ({}/{}) after: {}",
                request.message,
                request.trials,
                self.shared.config.registrar_request_max_trials,
                error
            );
            self.pending.push_front(request);
        } else {
            log::debug!("[asap] {} failed: {}", request.message, error);
            self.shared.table.lock().unpin();
            request.complete(Err(error));
        }
    }

    fn disconnect(&mut self) {
        let previous = self.shared.state.lock().registrar.take();
        if let Some(registrar) = previous {
            log::debug!(
                "[asap] disconnecting from registrar ${:08x} at {}",
                registrar.identifier,
                registrar.address
            );
            self.transport.close(registrar.connection);
        }
    }

    fn check_timeout(&mut self) {
        let now = self.shared.clock.now();
        let expired = matches!(
            self.in_flight.as_ref().and_then(|r| r.deadline),
            Some(deadline) if deadline <= now
        );
        if !expired {
            return;
        }
        if let Some(request) = self.in_flight.take() {
            log::warn!("[asap] no response to {} in time", request.message);
            self.disconnect();
            self.retry_or_fail(request, RspError::Timeout);
        }
    }

    // ------------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------------

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted { conn, remote } => {
                log::debug!("[asap] inbound registrar connection {} from {}", conn, remote);
                self.inbound.insert(conn, remote);
            }
            TransportEvent::Closed { conn } => {
                self.inbound.remove(&conn);
                let was_registrar = {
                    let mut state = self.shared.state.lock();
                    if state.registrar.map(|r| r.connection) == Some(conn) {
                        state.registrar = None;
                        true
                    } else {
                        false
                    }
                };
                if was_registrar {
                    log::debug!("[asap] registrar closed the connection");
                    if let Some(request) = self.in_flight.take() {
                        self.retry_or_fail(request, RspError::NoRegistrar);
                    }
                }
            }
            TransportEvent::Message {
                conn,
                ppid,
                payload,
            } => self.handle_message(conn, ppid, &payload),
        }
    }

    fn handle_message(&mut self, conn: ConnectionId, ppid: u32, payload: &[u8]) {
        let registrar = self.current_registrar();
        let on_registrar = registrar.map(|r| r.connection) == Some(conn);
        if !on_registrar && !self.inbound.contains_key(&conn) {
            log::debug!("[asap] ignoring message on stale connection {}", conn);
            return;
        }

        let message = match decode(payload, ppid) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[asap] malformed message on connection {}: {}", conn, e);
                if on_registrar {
                    self.protocol_violation(RspError::from(e));
                } else {
                    self.inbound.remove(&conn);
                    self.transport.close(conn);
                }
                return;
            }
        };

        match message {
            RserpoolMessage::EndpointKeepAlive {
                registrar_identifier,
                home,
                pool_handle,
                identifier,
            } => self.handle_keep_alive(conn, registrar_identifier, home, &pool_handle, identifier),
            RserpoolMessage::ServerAnnounce { .. } => {
                if let Some(registrar) = registrar.filter(|_| on_registrar) {
                    let now = self.shared.clock.now();
                    handle_announce(&mut self.shared.table.lock(), &message, registrar.address, now);
                }
            }
            RserpoolMessage::BusinessCard { .. }
            | RserpoolMessage::Cookie { .. }
            | RserpoolMessage::CookieEcho { .. } => {
                log::debug!("[asap] ignoring {} on connection {}", message, conn);
            }
            other if on_registrar => self.handle_response(other),
            other => {
                log::debug!("[asap] ignoring {} on inbound connection {}", other, conn);
            }
        }
    }

    fn protocol_violation(&mut self, error: RspError) {
        self.disconnect();
        if let Some(request) = self.in_flight.take() {
            self.shared.table.lock().unpin();
            request.complete(Err(error));
        }
    }

    fn handle_response(&mut self, response: RserpoolMessage) {
        let Some(request) = self.in_flight.take() else {
            log::warn!("[asap] unsolicited {} from registrar", response);
            return;
        };

        let verdict = judge(&request, &response);
        log::debug!("[asap] {} -> {:?}", response, verdict);
        match verdict {
            Verdict::Accept => {
                if let RserpoolMessage::Registration {
                    pool_handle,
                    pool_element,
                } = &request.message
                {
                    self.record_registration(pool_handle, pool_element);
                }
                self.shared.table.lock().unpin();
                request.complete(Ok(response));
            }
            Verdict::Reject(error) => {
                self.shared.table.lock().unpin();
                request.complete(Err(error));
            }
            Verdict::Retry(error) => {
                if let Some(registrar) = self.current_registrar() {
                    self.shared
                        .table
                        .lock()
                        .pin(registrar.identifier, registrar.address);
                }
                self.disconnect();
                self.retry_or_fail(request, error);
            }
            Verdict::Violation(reason) => {
                log::warn!("[asap] protocol violation: {}", reason);
                self.in_flight = Some(request);
                self.protocol_violation(RspError::ProtocolViolation(reason));
            }
        }
    }

    fn record_registration(
        &mut self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
    ) {
        let registrar = self.current_registrar();
        let mut element = element.clone();
        element.home_registrar_identifier = registrar
            .map(|r| r.identifier)
            .unwrap_or(UNDEFINED_REGISTRAR_IDENTIFIER);
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();
        if let Err(e) = state.own.register_pool_element(
            pool_handle,
            &element,
            registrar.map(|r| r.connection),
            now,
        ) {
            log::warn!(
                "[asap] cannot record {}/${:08x}: {}",
                pool_handle,
                element.identifier,
                e
            );
        }
    }

    /// Forget a deregistered element once more as its DEREGISTRATION leaves.
    ///
    /// A REGISTRATION queued ahead of it may have been answered after the
    /// caller already removed the element from the own handlespace.
    fn withdraw_own_element(&mut self, message: &RserpoolMessage) {
        let RserpoolMessage::Deregistration {
            pool_handle,
            identifier,
        } = message
        else {
            return;
        };
        if self
            .shared
            .state
            .lock()
            .own
            .deregister_pool_element(pool_handle, *identifier)
            .is_ok()
        {
            log::debug!(
                "[asap] withdrew {}/${:08x} answered after its deregistration",
                pool_handle,
                identifier
            );
        }
    }

    // ------------------------------------------------------------------------
    // Keep-alive and hand-off
    // ------------------------------------------------------------------------

    fn handle_keep_alive(
        &mut self,
        conn: ConnectionId,
        registrar_identifier: RegistrarIdentifier,
        home: bool,
        pool_handle: &PoolHandle,
        identifier: Option<PoolElementIdentifier>,
    ) {
        let current = self.current_registrar();
        let on_registrar = current.map(|r| r.connection) == Some(conn);
        if !on_registrar {
            if home && current.map(|r| r.identifier) != Some(registrar_identifier) {
                self.hand_off(conn, registrar_identifier);
            }
        } else if registrar_identifier != UNDEFINED_REGISTRAR_IDENTIFIER
            && current.map(|r| r.identifier) != Some(registrar_identifier)
        {
            self.learn_registrar_identifier(registrar_identifier);
        }

        let acks: Vec<(PoolHandle, PoolElementIdentifier)> = {
            let state = self.shared.state.lock();
            match identifier {
                Some(id) => state
                    .own
                    .find_pool_element(pool_handle, id)
                    .map(|n| vec![(n.pool_handle.clone(), n.identifier)])
                    .unwrap_or_default(),
                None => state
                    .own
                    .iter()
                    .map(|n| (n.pool_handle.clone(), n.identifier))
                    .collect(),
            }
        };
        if acks.is_empty() {
            log::debug!(
                "[asap] keep-alive for {}/{:?} matches no own pool element",
                pool_handle,
                identifier
            );
        }
        for (pool_handle, identifier) in acks {
            let ack = RserpoolMessage::EndpointKeepAliveAck {
                pool_handle,
                identifier,
            };
            let sent = encode(&ack).map_err(RspError::from).and_then(|bytes| {
                self.transport
                    .send(conn, PPID_ASAP, &bytes)
                    .map_err(RspError::from)
            });
            if let Err(e) = sent {
                log::warn!("[asap] cannot send {}: {}", ack, e);
            }
        }
    }

    /// Adopt an inbound registrar connection as the new home registrar.
    fn hand_off(&mut self, conn: ConnectionId, registrar_identifier: RegistrarIdentifier) {
        let Some(address) = self.inbound.remove(&conn) else {
            return;
        };
        let now = self.shared.clock.now();
        let previous = self.shared.state.lock().registrar.replace(RegistrarConnection {
            connection: conn,
            identifier: registrar_identifier,
            address,
            connected_at: now,
        });
        log::info!(
            "[asap] registrar hand-off to ${:08x} ({})",
            registrar_identifier,
            address
        );
        if let Some(previous) = previous {
            self.transport.close(previous.connection);
        }
        // Anything awaiting the old registrar is resent to the new one.
        if let Some(mut request) = self.in_flight.take() {
            request.deadline = None;
            self.pending.push_front(request);
        }
        self.rehome_own_elements(registrar_identifier);
    }

    fn learn_registrar_identifier(&mut self, registrar_identifier: RegistrarIdentifier) {
        let address = {
            let mut state = self.shared.state.lock();
            match state.registrar.as_mut() {
                Some(registrar) => {
                    registrar.identifier = registrar_identifier;
                    registrar.address
                }
                None => return,
            }
        };
        self.shared
            .table
            .lock()
            .learn_identifier(&address, registrar_identifier);
        self.rehome_own_elements(registrar_identifier);
    }

    fn rehome_own_elements(&mut self, registrar_identifier: RegistrarIdentifier) {
        let mut state = self.shared.state.lock();
        let owned: Vec<(PoolHandle, PoolElementIdentifier)> = state
            .own
            .iter()
            .map(|n| (n.pool_handle.clone(), n.identifier))
            .collect();
        for (pool_handle, identifier) in owned {
            if let Err(e) =
                state
                    .own
                    .update_home_registrar(&pool_handle, identifier, registrar_identifier)
            {
                log::warn!(
                    "[asap] cannot rehome {}/${:08x}: {}",
                    pool_handle,
                    identifier,
                    e
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    fn drain(&mut self) {
        let mut aborted = 0usize;
        if let Some(request) = self.in_flight.take() {
            request.complete(Err(RspError::Aborted));
            aborted += 1;
        }
        for request in self.pending.drain(..) {
            request.complete(Err(RspError::Aborted));
            aborted += 1;
        }
        for command in self.commands.try_iter() {
            if let Command::Submit(request) = command {
                request.complete(Err(RspError::Aborted));
                aborted += 1;
            }
        }
        if aborted > 0 {
            log::debug!("[asap] aborted {} pending request(s)", aborted);
        }
        self.disconnect();
        for (conn, _) in self.inbound.drain() {
            self.transport.close(conn);
        }
    }
}

/// Check a response against the request awaiting it.
fn judge(request: &Request, response: &RserpoolMessage) -> Verdict {
    let response_type = response.message_type();
    if response_type == AHT_ERROR {
        return Verdict::Violation(format!("registrar answered {} with {}", request.message, response));
    }
    if Some(response_type) != request.response_type {
        return Verdict::Violation(format!(
            "expected {}, got {}",
            request
                .response_type
                .map(message_type_name)
                .unwrap_or("no response"),
            message_type_name(response_type)
        ));
    }
    if request.message.pool_handle() != response.pool_handle() {
        return Verdict::Violation(format!(
            "response {} does not match request {}",
            response, request.message
        ));
    }

    match (&request.message, response) {
        (
            RserpoolMessage::Registration { pool_element, .. },
            RserpoolMessage::RegistrationResponse {
                identifier, error, ..
            },
        ) => {
            if *identifier != pool_element.identifier {
                return Verdict::Violation(format!(
                    "registration response for ${:08x}, requested ${:08x}",
                    identifier, pool_element.identifier
                ));
            }
            match error {
                None => Verdict::Accept,
                Some(error) => match RspError::from_cause(error.cause) {
                    e @ (RspError::NoUsableUserAddresses | RspError::NoUsableAsapAddresses) => {
                        Verdict::Retry(e)
                    }
                    e => Verdict::Reject(e),
                },
            }
        }
        (
            RserpoolMessage::Deregistration { identifier, .. },
            RserpoolMessage::DeregistrationResponse {
                identifier: answered,
                error,
                ..
            },
        ) => {
            if answered != identifier {
                return Verdict::Violation(format!(
                    "deregistration response for ${:08x}, requested ${:08x}",
                    answered, identifier
                ));
            }
            match error {
                None => Verdict::Accept,
                Some(error) => Verdict::Reject(RspError::from_cause(error.cause)),
            }
        }
        (
            RserpoolMessage::HandleResolution { .. },
            RserpoolMessage::HandleResolutionResponse { .. },
        ) => Verdict::Accept,
        _ => Verdict::Violation(format!("unexpected {}", response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OperationError;
    use crate::policy::PolicySettings;
    use crate::types::TransportAddressBlock;

    fn ph() -> PoolHandle {
        PoolHandle::try_from("EchoPool").unwrap()
    }

    fn registration(identifier: u32) -> Request {
        let message = RserpoolMessage::Registration {
            pool_handle: ph(),
            pool_element: PoolElementParameter {
                identifier,
                home_registrar_identifier: 0,
                registration_life: 30_000,
                user_transport: TransportAddressBlock::tcp("127.0.0.1:9000".parse().unwrap()),
                policy: PolicySettings::round_robin(),
                registrator_transport: None,
            },
        };
        Request::new(message, false, 0).unwrap().0
    }

    fn response(identifier: u32, cause: Option<u16>) -> RserpoolMessage {
        RserpoolMessage::RegistrationResponse {
            pool_handle: ph(),
            identifier,
            error: cause.map(OperationError::new),
        }
    }

    #[test]
    fn test_judge_registration() {
        assert!(matches!(
            judge(&registration(1), &response(1, None)),
            Verdict::Accept
        ));
        assert!(matches!(
            judge(&registration(1), &response(2, None)),
            Verdict::Violation(_)
        ));
        assert!(matches!(
            judge(
                &registration(1),
                &response(1, Some(AEC_NO_USABLE_USER_ADDRESSES))
            ),
            Verdict::Retry(RspError::NoUsableUserAddresses)
        ));
        assert!(matches!(
            judge(
                &registration(1),
                &response(1, Some(AEC_INCONSISTENT_POOL_POLICY))
            ),
            Verdict::Reject(RspError::IncompatiblePoolPolicy)
        ));
    }

    #[test]
    fn test_judge_type_mismatch_and_error() {
        let wrong = RserpoolMessage::DeregistrationResponse {
            pool_handle: ph(),
            identifier: 1,
            error: None,
        };
        assert!(matches!(
            judge(&registration(1), &wrong),
            Verdict::Violation(_)
        ));
        let error = RserpoolMessage::Error {
            error: OperationError::new(AEC_UNRECOGNIZED_MESSAGE),
        };
        assert!(matches!(
            judge(&registration(1), &error),
            Verdict::Violation(_)
        ));
    }
}
