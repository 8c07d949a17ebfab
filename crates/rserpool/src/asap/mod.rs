// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ASAP client engine.
//!
//! An [`AsapInstance`] is the pool-user / pool-element side of ASAP. Calls
//! run on the caller's thread and talk to a dedicated worker through a
//! request queue; synchronous calls block on a one-shot reply port.
//!
//! ```no_run
//! use rserpool::{AsapConfig, AsapInstance, PoolHandle};
//!
//! let config = AsapConfig::default().with_static_registrar("127.0.0.1:3863");
//! let asap = AsapInstance::new(config)?;
//! let pool = PoolHandle::try_from("EchoPool")?;
//! let servers = asap.handle_resolution(&pool, 3, 5_000_000, |pe| {
//!     pe.user_transport.socket_addrs().first().copied()
//! })?;
//! # Ok::<(), rserpool::RspError>(())
//! ```
//!
//! Lock order: `Shared::state` and the registrar table are never held at
//! the same time.

mod request;
mod worker;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::AsapConfig;
use crate::error::{Result, RspError};
use crate::handlespace::{PoolElementNode, PoolHandlespace};
use crate::message::constants::{
    MAX_MAX_HANDLE_RESOLUTION_ITEMS, UNDEFINED_POOL_ELEMENT_IDENTIFIER,
    UNDEFINED_REGISTRAR_IDENTIFIER,
};
use crate::message::{PoolElementParameter, RserpoolMessage};
use crate::registrar::{AnnounceListener, RegistrarTable};
use crate::transport::{ConnectionId, TcpTransport, Transport};
use crate::types::{PoolElementIdentifier, PoolHandle, RegistrarIdentifier, TransportAddressBlock};
use request::{wait_reply, Request};
use worker::Worker;

/// The current registrar connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrarConnection {
    pub connection: ConnectionId,
    /// Zero while the registrar's identifier is unknown.
    pub identifier: RegistrarIdentifier,
    pub address: SocketAddr,
    pub connected_at: u64,
}

pub(crate) enum Command {
    Submit(Request),
    Shutdown,
}

pub(crate) struct EngineState {
    /// Resolved pool elements of other processes, subject to staleness.
    pub cache: PoolHandlespace,
    /// Pool elements registered by this instance.
    pub own: PoolHandlespace,
    pub registrar: Option<RegistrarConnection>,
}

pub(crate) struct Shared {
    pub state: Mutex<EngineState>,
    pub table: Arc<Mutex<RegistrarTable>>,
    pub config: AsapConfig,
    pub clock: Arc<dyn Clock>,
    pub shutdown: AtomicBool,
}

/// ASAP endpoint: registration, deregistration and handle resolution.
pub struct AsapInstance {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    transport: Arc<dyn Transport>,
    worker: Option<JoinHandle<()>>,
    announce: Option<AnnounceListener>,
    listen_address: Option<SocketAddr>,
}

impl AsapInstance {
    /// Instance over TCP with the system clock.
    pub fn new(config: AsapConfig) -> Result<Self> {
        Self::with_transport(
            config,
            Arc::new(TcpTransport::new()),
            Arc::new(SystemClock::new()),
        )
    }

    /// Instance over a caller-supplied transport and clock.
    ///
    /// The transport's event stream is consumed by this instance only.
    pub fn with_transport(
        config: AsapConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let mut table = RegistrarTable::new(config.registrar_announce_timeout_us);
        for block in config.static_registrar_blocks()? {
            table.add_static_entry(block);
        }
        let table = Arc::new(Mutex::new(table));

        let announce = if config.enable_auto_config {
            match AnnounceListener::spawn(
                config.registrar_announce_address,
                Arc::clone(&table),
                Arc::clone(&clock),
            ) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    log::warn!(
                        "[asap] cannot listen for announces on {}: {}",
                        config.registrar_announce_address,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let listen_address = match config.asap_listen_address {
            Some(addr) => Some(transport.listen(addr)?),
            None => None,
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState {
                cache: PoolHandlespace::new(),
                own: PoolHandlespace::new(),
                registrar: None,
            }),
            table,
            config,
            clock,
            shutdown: AtomicBool::new(false),
        });

        let (commands, queue) = channel::unbounded();
        let worker = Worker::new(
            Arc::clone(&shared),
            Arc::clone(&transport),
            queue,
            transport.events(),
        );
        let handle = thread::Builder::new()
            .name("rsp-asap".to_string())
            .spawn(move || worker.run())?;

        log::debug!("[asap] instance started");
        Ok(Self {
            shared,
            commands,
            transport,
            worker: Some(handle),
            announce,
            listen_address,
        })
    }

    fn submit(&self, request: Request) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(RspError::Aborted);
        }
        self.commands
            .send(Command::Submit(request))
            .map_err(|_| RspError::Aborted)
    }

    /// Register (or reregister) a pool element.
    ///
    /// An identifier of zero is replaced by a random one. Reregistering an
    /// existing element with incompatible settings fails locally. With
    /// `wait_for_response` unset the call returns once the request is queued;
    /// in `daemon_mode` the element is recorded locally before the registrar
    /// confirms it.
    ///
    /// Returns the element's identifier.
    pub fn register(
        &self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
        wait_for_response: bool,
        daemon_mode: bool,
    ) -> Result<PoolElementIdentifier> {
        let mut element = element.clone();
        element.home_registrar_identifier = UNDEFINED_REGISTRAR_IDENTIFIER;
        let now = self.shared.clock.now();

        let mut state = self.shared.state.lock();
        if element.identifier == UNDEFINED_POOL_ELEMENT_IDENTIFIER {
            element.identifier = loop {
                let candidate = fastrand::u32(1..);
                if state.own.find_pool_element(pool_handle, candidate).is_none() {
                    break candidate;
                }
            };
        }
        if let Some(existing) = state.own.find_pool_element(pool_handle, element.identifier) {
            existing.check_compatibility(&element)?;
        } else if let Some(pool) = state.own.pool(pool_handle) {
            if pool.policy_type != element.policy.policy_type {
                return Err(RspError::IncompatiblePoolPolicy);
            }
        }

        let identifier = element.identifier;
        let (request, port) = Request::new(
            RserpoolMessage::Registration {
                pool_handle: pool_handle.clone(),
                pool_element: element.clone(),
            },
            wait_for_response,
            now,
        )?;
        if daemon_mode {
            element.home_registrar_identifier = state
                .registrar
                .map(|r| r.identifier)
                .unwrap_or(UNDEFINED_REGISTRAR_IDENTIFIER);
            state.own.register_pool_element(pool_handle, &element, None, now)?;
        }
        drop(state);

        log::debug!("[asap] register {}/${:08x}", pool_handle, identifier);
        self.submit(request)?;
        if let Some(port) = port {
            wait_reply(port)?;
        }
        Ok(identifier)
    }

    /// Deregister a pool element.
    ///
    /// The element is forgotten locally before the registrar is asked, so a
    /// failed request still leaves it deregistered here.
    pub fn deregister(
        &self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
        wait_for_response: bool,
    ) -> Result<()> {
        let (request, port) = Request::new(
            RserpoolMessage::Deregistration {
                pool_handle: pool_handle.clone(),
                identifier,
            },
            wait_for_response,
            self.shared.clock.now(),
        )?;
        if self
            .shared
            .state
            .lock()
            .own
            .deregister_pool_element(pool_handle, identifier)
            .is_err()
        {
            log::debug!(
                "[asap] {}/${:08x} was not registered locally",
                pool_handle,
                identifier
            );
        }

        self.submit(request)?;
        if let Some(port) = port {
            wait_reply(port)?;
        }
        Ok(())
    }

    /// Resolve a pool handle to up to `max_items` converted pool elements.
    ///
    /// The cache is tried first; on a miss the registrar is asked and its
    /// answer is cached for `staleness_timeout_us`. If `convert` rejects any
    /// element the whole call fails with `ConversionFailed`.
    pub fn handle_resolution<T, F>(
        &self,
        pool_handle: &PoolHandle,
        max_items: usize,
        staleness_timeout_us: u64,
        mut convert: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(&PoolElementNode) -> Option<T>,
    {
        let max_items = max_items.clamp(1, MAX_MAX_HANDLE_RESOLUTION_ITEMS);
        if let Some(resolved) = self.resolve_from_cache(pool_handle, max_items, &mut convert)? {
            return Ok(resolved);
        }

        log::debug!("[asap] cache miss for {}, asking registrar", pool_handle);
        let (request, port) = Request::new(
            RserpoolMessage::HandleResolution {
                pool_handle: pool_handle.clone(),
                items: Some(max_items as u32),
            },
            true,
            self.shared.clock.now(),
        )?;
        self.submit(request)?;
        let port = port.ok_or(RspError::Aborted)?;
        match wait_reply(port)? {
            RserpoolMessage::HandleResolutionResponse {
                error: Some(error), ..
            } => return Err(RspError::from_cause(error.cause)),
            RserpoolMessage::HandleResolutionResponse { elements, .. } => {
                let now = self.shared.clock.now();
                let mut state = self.shared.state.lock();
                for element in &elements {
                    install_in_cache(
                        &mut state.cache,
                        pool_handle,
                        element,
                        staleness_timeout_us,
                        now,
                    );
                }
            }
            other => {
                return Err(RspError::ProtocolViolation(format!(
                    "unexpected reply {}",
                    other
                )))
            }
        }

        self.resolve_from_cache(pool_handle, max_items, &mut convert)?
            .ok_or(RspError::NotFound)
    }

    fn resolve_from_cache<T, F>(
        &self,
        pool_handle: &PoolHandle,
        max_items: usize,
        convert: &mut F,
    ) -> Result<Option<Vec<T>>>
    where
        F: FnMut(&PoolElementNode) -> Option<T>,
    {
        let now = self.shared.clock.now();
        let nodes: Vec<PoolElementNode> = {
            let mut state = self.shared.state.lock();
            let purged = state.cache.purge_expired_pool_elements(now);
            if purged > 0 {
                log::debug!("[asap] purged {} stale cache entries", purged);
            }
            let selected = match state.cache.handle_resolution(pool_handle, max_items, 1) {
                Ok(nodes) => nodes.into_iter().cloned().collect(),
                Err(RspError::NotFound) => return Ok(None),
                Err(e) => return Err(e),
            };
            selected
        };
        // `convert` runs unlocked; it may call back into this instance.
        let mut resolved = Vec::with_capacity(nodes.len());
        for node in &nodes {
            match convert(node) {
                Some(value) => resolved.push(value),
                None => return Err(RspError::ConversionFailed),
            }
        }
        Ok(Some(resolved))
    }

    /// Put a pool element learned out of band (e.g. from a business card)
    /// into the cache.
    pub fn cache_pool_element(
        &self,
        pool_handle: &PoolHandle,
        element: &PoolElementParameter,
        staleness_timeout_us: u64,
    ) -> Result<()> {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.lock();
        let handle = state
            .cache
            .register_pool_element(pool_handle, element, None, now)?;
        state
            .cache
            .restart_expiry_timer(handle, staleness_timeout_us, now)
    }

    /// Report an unreachable pool element.
    ///
    /// The element leaves the cache immediately; the registrar is told in
    /// the background.
    pub fn report_failure(
        &self,
        pool_handle: &PoolHandle,
        identifier: PoolElementIdentifier,
    ) -> Result<()> {
        if self
            .shared
            .state
            .lock()
            .cache
            .deregister_pool_element(pool_handle, identifier)
            .is_ok()
        {
            log::debug!(
                "[asap] dropped {}/${:08x} from cache",
                pool_handle,
                identifier
            );
        }
        let (request, _) = Request::new(
            RserpoolMessage::EndpointUnreachable {
                pool_handle: pool_handle.clone(),
                identifier,
            },
            false,
            self.shared.clock.now(),
        )?;
        self.submit(request)
    }

    /// Add a registrar at runtime.
    pub fn add_static_registrar(&self, transport: TransportAddressBlock) {
        self.shared.table.lock().add_static_entry(transport);
    }

    /// Current registrar connection, if any.
    pub fn registrar(&self) -> Option<RegistrarConnection> {
        self.shared.state.lock().registrar
    }

    /// Address of the inbound registrar listener.
    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.listen_address
    }

    /// Pool elements registered by this instance.
    pub fn own_pool_elements(&self) -> Vec<(PoolHandle, PoolElementParameter)> {
        self.shared
            .state
            .lock()
            .own
            .iter()
            .map(|n| (n.pool_handle.clone(), n.to_parameter()))
            .collect()
    }

    /// Number of cached pool elements.
    pub fn cached_pool_element_count(&self) -> usize {
        self.shared.state.lock().cache.pool_element_count()
    }

    /// Stop the worker, failing all pending requests with `Aborted`.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[asap] worker panicked");
            }
            log::debug!("[asap] instance stopped");
        }
        if let Some(mut announce) = self.announce.take() {
            announce.stop();
        }
        self.transport.shutdown();
    }
}

impl Drop for AsapInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cache one resolved element, replacing the cached pool if its policy or
/// transport changed.
fn install_in_cache(
    cache: &mut PoolHandlespace,
    pool_handle: &PoolHandle,
    element: &PoolElementParameter,
    staleness_timeout_us: u64,
    now: u64,
) {
    let result = match cache.register_pool_element(pool_handle, element, None, now) {
        Err(RspError::IncompatiblePoolPolicy | RspError::IncompatiblePoolTransport) => {
            cache.remove_pool(pool_handle);
            cache.register_pool_element(pool_handle, element, None, now)
        }
        other => other,
    };
    match result.and_then(|h| cache.restart_expiry_timer(h, staleness_timeout_us, now)) {
        Ok(()) => {}
        Err(e) => log::warn!(
            "[asap] cannot cache {}/${:08x}: {}",
            pool_handle,
            element.identifier,
            e
        ),
    }
}
