// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP implementation of [`Transport`].
//!
//! ```text
//! connect()  --mio parallel connect--> winner --+
//! listen()   --accept thread---------> inbound -+--> reader thread per connection
//!                                                         |
//!                                         FrameBuffer -> TransportEvent channel
//! ```
//!
//! Writes happen on the caller's thread through a cloned stream handle.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::framing::{encode_frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use super::{ConnectionId, Transport, TransportEvent};

/// Accept loop wake-up interval while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-read buffer size.
const READ_BUFFER_SIZE: usize = 8192;

/// Default bound on a single blocking write.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

struct Shared {
    connections: Mutex<HashMap<ConnectionId, TcpStream>>,
    next_id: AtomicU64,
    events_tx: Sender<TransportEvent>,
    shutdown: AtomicBool,
    max_frame_size: usize,
    send_timeout: Duration,
}

/// Framed TCP transport with one reader thread per connection.
pub struct TcpTransport {
    shared: Arc<Shared>,
    events_rx: Receiver<TransportEvent>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FRAME_SIZE, DEFAULT_SEND_TIMEOUT)
    }

    /// Transport with a custom frame size cap and write timeout.
    pub fn with_limits(max_frame_size: usize, send_timeout: Duration) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events_tx,
                shutdown: AtomicBool::new(false),
                max_frame_size,
                send_timeout,
            }),
            events_rx,
        }
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }
}

/// Take ownership of a connected stream and start its reader.
///
/// For inbound streams `Accepted` is queued before the reader can emit
/// any `Message` for the connection.
fn adopt(
    shared: &Arc<Shared>,
    stream: TcpStream,
    inbound_from: Option<SocketAddr>,
) -> io::Result<ConnectionId> {
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(shared.send_timeout))?;
    let reader = stream.try_clone()?;
    let conn = shared.next_id.fetch_add(1, Ordering::Relaxed);
    shared.connections.lock().insert(conn, stream);
    if let Some(remote) = inbound_from {
        log::debug!("[tcp] accepted {} as connection {}", remote, conn);
        let _ = shared
            .events_tx
            .send(TransportEvent::Accepted { conn, remote });
    }

    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("rsp-tcp-rx-{}", conn))
        .spawn(move || reader_loop(shared, conn, reader))?;
    Ok(conn)
}

fn reader_loop(shared: Arc<Shared>, conn: ConnectionId, mut stream: TcpStream) {
    let mut frames = FrameBuffer::new(shared.max_frame_size);
    let mut buf = [0u8; READ_BUFFER_SIZE];
    'read: loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                frames.push(&buf[..n]);
                loop {
                    match frames.next_frame() {
                        Ok(Some((ppid, payload))) => {
                            let event = TransportEvent::Message {
                                conn,
                                ppid,
                                payload,
                            };
                            if shared.events_tx.send(event).is_err() {
                                break 'read;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("[tcp] connection {}: {}", conn, e);
                            break 'read;
                        }
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("[tcp] connection {} read error: {}", conn, e);
                break;
            }
        }
    }

    let still_open = shared.connections.lock().remove(&conn);
    if let Some(stream) = still_open {
        let _ = stream.shutdown(Shutdown::Both);
        let _ = shared.events_tx.send(TransportEvent::Closed { conn });
        log::debug!("[tcp] connection {} closed by peer", conn);
    }
}

struct Attempt {
    addr: SocketAddr,
    stream: mio::net::TcpStream,
    deadline: Instant,
}

/// Race non-blocking connects against `candidates`, at most `parallelism` at once.
fn connect_first(
    candidates: &[SocketAddr],
    parallelism: usize,
    timeout: Duration,
) -> io::Result<(TcpStream, SocketAddr)> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(16);
    let mut attempts: HashMap<usize, Attempt> = HashMap::new();
    let mut next = 0usize;
    let mut last_error: Option<io::Error> = None;

    loop {
        while attempts.len() < parallelism.max(1) && next < candidates.len() {
            let addr = candidates[next];
            let token = next;
            next += 1;
            match mio::net::TcpStream::connect(addr) {
                Ok(mut stream) => {
                    poll.registry()
                        .register(&mut stream, Token(token), Interest::WRITABLE)?;
                    log::debug!("[tcp] connecting to {}", addr);
                    attempts.insert(
                        token,
                        Attempt {
                            addr,
                            stream,
                            deadline: Instant::now() + timeout,
                        },
                    );
                }
                Err(e) => {
                    log::debug!("[tcp] connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        if attempts.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no connection candidates")
            }));
        }

        let now = Instant::now();
        let nearest = attempts
            .values()
            .map(|a| a.deadline)
            .min()
            .unwrap_or(now);
        match poll.poll(&mut events, Some(nearest.saturating_duration_since(now))) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        let mut finished: Vec<(usize, io::Result<()>)> = Vec::new();
        for event in events.iter() {
            let token = event.token().0;
            let Some(attempt) = attempts.get(&token) else {
                continue;
            };
            match attempt.stream.take_error() {
                Ok(Some(e)) | Err(e) => finished.push((token, Err(e))),
                Ok(None) => match attempt.stream.peer_addr() {
                    Ok(_) => finished.push((token, Ok(()))),
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                    Err(e) => finished.push((token, Err(e))),
                },
            }
        }

        for (token, outcome) in finished {
            let Some(mut attempt) = attempts.remove(&token) else {
                continue;
            };
            let _ = poll.registry().deregister(&mut attempt.stream);
            match outcome {
                Ok(()) => {
                    // Remaining attempts are dropped (aborted) with `attempts`.
                    let stream: TcpStream = attempt.stream.into();
                    stream.set_nonblocking(false)?;
                    log::debug!("[tcp] connected to {}", attempt.addr);
                    return Ok((stream, attempt.addr));
                }
                Err(e) => {
                    log::debug!("[tcp] connect to {} failed: {}", attempt.addr, e);
                    last_error = Some(e);
                }
            }
        }

        let now = Instant::now();
        attempts.retain(|_, attempt| {
            if attempt.deadline <= now {
                log::debug!("[tcp] connect to {} timed out", attempt.addr);
                last_error = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", attempt.addr),
                ));
                false
            } else {
                true
            }
        });
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, remote)) => {
                let adopted = stream
                    .set_nonblocking(false)
                    .and_then(|()| adopt(&shared, stream, Some(remote)));
                if let Err(e) = adopted {
                    log::warn!("[tcp] failed to adopt {}: {}", remote, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::warn!("[tcp] accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

impl Transport for TcpTransport {
    fn connect(
        &self,
        candidates: &[SocketAddr],
        parallelism: usize,
        timeout: Duration,
    ) -> io::Result<(ConnectionId, SocketAddr)> {
        let (stream, addr) = connect_first(candidates, parallelism, timeout)?;
        let conn = adopt(&self.shared, stream, None)?;
        Ok((conn, addr))
    }

    fn send(&self, conn: ConnectionId, ppid: u32, payload: &[u8]) -> io::Result<()> {
        let frame = encode_frame(ppid, payload);
        let connections = self.shared.connections.lock();
        let mut stream = connections.get(&conn).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "unknown connection")
        })?;
        stream.write_all(&frame)
    }

    fn close(&self, conn: ConnectionId) {
        if let Some(stream) = self.shared.connections.lock().remove(&conn) {
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("[tcp] closed connection {}", conn);
        }
    }

    fn listen(&self, addr: SocketAddr) -> io::Result<SocketAddr> {
        let listener = bind_listener(addr)?;
        let local = listener.local_addr()?;
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("rsp-tcp-accept-{}", local.port()))
            .spawn(move || accept_loop(shared, listener))?;
        log::debug!("[tcp] listening on {}", local);
        Ok(local)
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events_rx.clone()
    }

    fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let drained: Vec<TcpStream> = self
            .shared
            .connections
            .lock()
            .drain()
            .map(|(_, s)| s)
            .collect();
        for stream in drained {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
