// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registrar core implementation.

use crate::config::RegistrarConfig;
use rserpool::handlespace::ConnectionId;
use rserpool::message::constants::{AEC_UNRECOGNIZED_MESSAGE, PPID_ASAP};
use rserpool::{decode, Clock, OperationError, RegistrarIdentifier, RserpoolMessage, SystemClock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

pub mod announce;
pub mod connection;
pub mod registry;

pub use connection::ClientConnection;
pub use registry::{PoolRegistry, RegistryLimits, TimerAction};

/// Upper bound on the timer task's sleep.
const TIMER_TICK: Duration = Duration::from_millis(50);

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 100;

type Outbound = Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<RserpoolMessage>>>>;

/// ASAP registrar.
#[derive(Clone)]
pub struct Registrar {
    config: Arc<RegistrarConfig>,
    identifier: RegistrarIdentifier,
    registry: Arc<RwLock<PoolRegistry>>,
    outbound: Outbound,
    next_connection: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl Registrar {
    /// Create a new registrar.
    pub fn new(config: RegistrarConfig) -> Result<Self, ServerError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: RegistrarConfig, clock: Arc<dyn Clock>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let identifier = if config.registrar_identifier == 0 {
            fastrand::u32(1..)
        } else {
            config.registrar_identifier
        };
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            registry: Arc::new(RwLock::new(PoolRegistry::new(
                identifier,
                RegistryLimits::from(&config),
            ))),
            config: Arc::new(config),
            identifier,
            outbound: Arc::new(RwLock::new(HashMap::new())),
            next_connection: Arc::new(AtomicU64::new(1)),
            clock,
            shutdown_tx: Arc::new(shutdown_tx),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn identifier(&self) -> RegistrarIdentifier {
        self.identifier
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve ASAP on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        let local = listener.local_addr()?;
        info!(
            "Registrar ${:08x} listening on {}",
            self.identifier, local
        );

        self.spawn_timer_task();
        if self.config.announce_enabled {
            self.spawn_announcer(local)?;
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
                            info!("New connection {} from {}", id, peer_addr);
                            let registrar = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = registrar.handle_connection(id, stream, peer_addr).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = stopped(&mut shutdown) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_timer_task(&self) {
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        let clock = self.clock.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let wait = {
                    let now = clock.now();
                    registry
                        .read()
                        .await
                        .next_timer()
                        .map_or(TIMER_TICK, |at| {
                            Duration::from_micros(at.saturating_sub(now)).min(TIMER_TICK)
                        })
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        let actions = registry.write().await.process_timers(clock.now());
                        if !actions.is_empty() {
                            dispatch_timer_actions(&outbound, actions).await;
                        }
                    }
                    _ = stopped(&mut shutdown) => {
                        debug!("Timer task shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_announcer(&self, local: SocketAddr) -> Result<(), ServerError> {
        let advertised = self.config.advertised_address.or_else(|| {
            (!local.ip().is_unspecified()).then_some(local)
        });
        let socket = announce::create_announce_sender(
            self.config.announce_address,
            self.config.announce_ttl,
        )?;
        tokio::spawn(announce::run_announcer(
            socket,
            self.config.announce_address,
            announce::announce_message(self.identifier, advertised),
            self.config.announce_interval(),
            self.shutdown_tx.subscribe(),
        ));
        Ok(())
    }

    /// Handle a client connection.
    async fn handle_connection(
        &self,
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true)?;
        let mut conn = ClientConnection::new(id, stream, peer_addr, self.config.max_message_size);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<RserpoolMessage>(OUTBOUND_QUEUE);
        self.outbound.write().await.insert(id, outbound_tx);
        let mut shutdown = self.shutdown_tx.subscribe();

        let result = loop {
            tokio::select! {
                result = conn.read_frame() => {
                    match result {
                        Ok(Some((ppid, payload))) => {
                            if let Some(response) = self.process_frame(id, ppid, &payload).await {
                                if let Err(e) = conn.send_message(&response).await {
                                    break Err(e.into());
                                }
                            }
                        }
                        Ok(None) => {
                            info!("Connection closed: {}", peer_addr);
                            break Ok(());
                        }
                        Err(e) => break Err(e.into()),
                    }
                }
                Some(message) = outbound_rx.recv() => {
                    if let Err(e) = conn.send_message(&message).await {
                        break Err(e.into());
                    }
                }
                _ = stopped(&mut shutdown) => {
                    debug!("Connection handler shutting down: {}", peer_addr);
                    break Ok(());
                }
            }
        };

        self.outbound.write().await.remove(&id);
        let removed = self.registry.write().await.remove_connection(id);
        if removed > 0 {
            info!(
                "Removed {} pool element(s) registered over {}",
                removed, peer_addr
            );
        }
        result
    }

    /// Process one received frame; returns the response to send, if any.
    async fn process_frame(
        &self,
        connection: ConnectionId,
        ppid: u32,
        payload: &[u8],
    ) -> Option<RserpoolMessage> {
        if ppid != PPID_ASAP {
            debug!("Ignoring frame with PPID {} on connection {}", ppid, connection);
            return None;
        }
        let message = match decode(payload, ppid) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message on connection {}: {}", connection, e);
                return Some(RserpoolMessage::Error {
                    error: OperationError::new(AEC_UNRECOGNIZED_MESSAGE),
                });
            }
        };
        debug!("Received {} on connection {}", message, connection);

        let now = self.clock.now();
        let mut registry = self.registry.write().await;
        match message {
            RserpoolMessage::Registration {
                pool_handle,
                pool_element,
            } => Some(registry.register(&pool_handle, &pool_element, connection, now)),
            RserpoolMessage::Deregistration {
                pool_handle,
                identifier,
            } => Some(registry.deregister(&pool_handle, identifier)),
            RserpoolMessage::HandleResolution { pool_handle, items } => {
                Some(registry.handle_resolution(&pool_handle, items))
            }
            RserpoolMessage::EndpointUnreachable {
                pool_handle,
                identifier,
            } => {
                registry.report_unreachable(&pool_handle, identifier);
                None
            }
            RserpoolMessage::EndpointKeepAliveAck {
                pool_handle,
                identifier,
            } => {
                registry.keep_alive_ack(&pool_handle, identifier, now);
                None
            }
            other => {
                debug!("Ignoring {} on connection {}", other, connection);
                None
            }
        }
    }

    /// Signal the registrar to shut down.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Current number of registered pool elements.
    pub async fn pool_element_count(&self) -> usize {
        self.registry.read().await.pool_element_count()
    }

    /// Current number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.outbound.read().await.len()
    }

    /// Check if the registrar is serving.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Resolves once shutdown is signalled, also when that happened before the call.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn dispatch_timer_actions(outbound: &Outbound, actions: Vec<TimerAction>) {
    let senders = outbound.read().await;
    for action in actions {
        match action {
            TimerAction::KeepAlive {
                connection,
                message,
            } => match senders.get(&connection) {
                Some(tx) => {
                    if tx.try_send(message).is_err() {
                        warn!("Outbound queue of connection {} is full", connection);
                    }
                }
                None => debug!("Keep-alive for closed connection {}", connection),
            },
            TimerAction::Expired { .. } => {}
        }
    }
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Bind(String),
    AlreadyRunning,
    Io(String),
    Protocol(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "Configuration error: {}", s),
            Self::Bind(s) => write!(f, "Bind error: {}", s),
            Self::AlreadyRunning => write!(f, "Registrar already running"),
            Self::Io(s) => write!(f, "I/O error: {}", s),
            Self::Protocol(s) => write!(f, "Protocol error: {}", s),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<connection::ConnectionError> for ServerError {
    fn from(e: connection::ConnectionError) -> Self {
        match e {
            connection::ConnectionError::Io(s) => Self::Io(s),
            connection::ConnectionError::Protocol(s) => Self::Protocol(s),
        }
    }
}
