// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Passive listener for registrar SERVER_ANNOUNCE datagrams.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use super::RegistrarTable;
use crate::clock::Clock;
use crate::message::constants::{ASAP_PORT, PPID_ASAP};
use crate::message::{decode, RserpoolMessage};
use crate::types::TransportAddressBlock;

/// Read timeout so the listener notices shutdown.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Create a UDP socket joined to the announce group.
pub fn create_announce_socket(group: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(group), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_ip = match group.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    socket.bind(&SocketAddr::new(bind_ip, group.port()).into())?;
    let socket: UdpSocket = socket.into();

    match group.ip() {
        IpAddr::V4(g) if g.is_multicast() => {
            socket.join_multicast_v4(&g, &Ipv4Addr::UNSPECIFIED)?;
        }
        IpAddr::V6(g) if g.is_multicast() => {
            socket.join_multicast_v6(&g, 0)?;
        }
        _ => {}
    }
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    log::debug!("[registrar-table] listening for announces on {}", group);
    Ok(socket)
}

/// Feed one decoded announce into the table.
///
/// An announce without transport parameters refers to the sender's address
/// on the ASAP port. Returns `true` if a new registrar was learned.
pub fn handle_announce(
    table: &mut RegistrarTable,
    message: &RserpoolMessage,
    source: SocketAddr,
    now: u64,
) -> bool {
    let RserpoolMessage::ServerAnnounce {
        registrar_identifier,
        transports,
    } = message
    else {
        log::debug!("[registrar-table] ignoring {} from {}", message, source);
        return false;
    };

    if transports.is_empty() {
        let fallback = TransportAddressBlock::tcp(SocketAddr::new(source.ip(), ASAP_PORT));
        return table.register_peer_from_announce(*registrar_identifier, fallback, now);
    }
    let mut learned = false;
    for transport in transports {
        learned |= table.register_peer_from_announce(*registrar_identifier, transport.clone(), now);
    }
    learned
}

/// Background thread feeding announces into a shared [`RegistrarTable`].
pub struct AnnounceListener {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AnnounceListener {
    pub fn spawn(
        group: SocketAddr,
        table: Arc<Mutex<RegistrarTable>>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let socket = create_announce_socket(group)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("rsp-announce".to_string())
            .spawn(move || listen_loop(socket, table, clock, flag))?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the listener thread and wait for it.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AnnounceListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen_loop(
    socket: UdpSocket,
    table: Arc<Mutex<RegistrarTable>>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; 65536];
    while !shutdown.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, source)) => match decode(&buf[..len], PPID_ASAP) {
                Ok(message) => {
                    handle_announce(&mut table.lock(), &message, source, clock.now());
                }
                Err(e) => {
                    log::debug!("[registrar-table] bad announce from {}: {}", source, e);
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                log::warn!("[registrar-table] announce socket error: {}", e);
                thread::sleep(RECV_TIMEOUT);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::encode;

    fn announce(id: u32, transports: Vec<TransportAddressBlock>) -> RserpoolMessage {
        RserpoolMessage::ServerAnnounce {
            registrar_identifier: id,
            transports,
        }
    }

    #[test]
    fn test_announce_without_transport_uses_source() {
        let mut table = RegistrarTable::new(1_000_000);
        let source: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        assert!(handle_announce(&mut table, &announce(9, vec![]), source, 0));
        let entry = table.last_announce_heard().unwrap();
        assert_eq!(entry.identifier, 9);
        assert_eq!(
            entry.transport.socket_addrs(),
            vec!["192.168.1.5:3863".parse().unwrap()]
        );
    }

    #[test]
    fn test_non_announce_ignored() {
        let mut table = RegistrarTable::new(1_000_000);
        let msg = RserpoolMessage::Cookie { cookie: vec![1] };
        assert!(!handle_announce(
            &mut table,
            &msg,
            "10.0.0.1:1".parse().unwrap(),
            0
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_listener_learns_unicast_announce() {
        // Unicast to a loopback port exercises the same receive path without
        // depending on multicast routing in the test environment.
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let target: SocketAddr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port);

        let table = Arc::new(Mutex::new(RegistrarTable::new(10_000_000)));
        let mut listener = AnnounceListener::spawn(
            target,
            Arc::clone(&table),
            Arc::new(ManualClock::new(1)),
        )
        .unwrap();

        let registrar: SocketAddr = "127.0.0.1:3863".parse().unwrap();
        let bytes = encode(&announce(0x1234, vec![TransportAddressBlock::tcp(registrar)])).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while table.lock().is_empty() && std::time::Instant::now() < deadline {
            sender.send_to(&bytes, target).unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        listener.stop();
        assert_eq!(table.lock().identify(&registrar), 0x1234);
    }
}
