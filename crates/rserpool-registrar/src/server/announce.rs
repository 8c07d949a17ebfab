// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic SERVER_ANNOUNCE sender.

use rserpool::{encode, RegistrarIdentifier, RserpoolMessage, TransportAddressBlock};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Create the UDP socket announces are sent from.
///
/// Multicast TTL and loopback are only set when `target` is a multicast group.
pub fn create_announce_sender(target: SocketAddr, ttl: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(target), Type::DGRAM, Some(Protocol::UDP))?;
    let bind_ip = match target.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    match target.ip() {
        IpAddr::V4(g) if g.is_multicast() => {
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(ttl)?;
        }
        IpAddr::V6(g) if g.is_multicast() => {
            socket.set_multicast_loop_v6(true)?;
            socket.set_multicast_hops_v6(ttl)?;
        }
        _ => {}
    }
    socket.bind(&SocketAddr::new(bind_ip, 0).into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// The announce this registrar sends.
///
/// Without an advertised transport the announce carries none, and receivers
/// fall back to the datagram's source address.
pub fn announce_message(
    registrar_identifier: RegistrarIdentifier,
    advertised: Option<SocketAddr>,
) -> RserpoolMessage {
    RserpoolMessage::ServerAnnounce {
        registrar_identifier,
        transports: advertised
            .map(TransportAddressBlock::tcp)
            .into_iter()
            .collect(),
    }
}

/// Send `message` to `target` every `interval` until `shutdown` flips.
pub async fn run_announcer(
    socket: UdpSocket,
    target: SocketAddr,
    message: RserpoolMessage,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let payload = match encode(&message) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Cannot encode announce: {}", e);
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);
    debug!("Announcing to {} every {:?}", target, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&payload, target).await {
                    warn!("Announce to {} failed: {}", target, e);
                }
            }
            _ = super::stopped(&mut shutdown) => {
                debug!("Announcer shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rserpool::message::constants::PPID_ASAP;
    use rserpool::registrar::{handle_announce, RegistrarTable};

    #[test]
    fn test_announce_message_transports() {
        let message = announce_message(7, Some("10.1.2.3:3863".parse().unwrap()));
        let RserpoolMessage::ServerAnnounce { transports, .. } = message else {
            panic!("not an announce");
        };
        assert_eq!(transports.len(), 1);
        assert_eq!(
            transports[0].socket_addrs(),
            vec!["10.1.2.3:3863".parse::<SocketAddr>().unwrap()]
        );

        assert!(matches!(
            announce_message(7, None),
            RserpoolMessage::ServerAnnounce { transports, .. } if transports.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_announces_reach_a_registrar_table() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = receiver.local_addr().unwrap();
        let sender = create_announce_sender(target, 1).unwrap();
        let advertised: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_announcer(
            sender,
            target,
            announce_message(0xabc, Some(advertised)),
            Duration::from_millis(20),
            stop_rx,
        ));

        let mut buf = [0u8; 1024];
        let (n, source) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let message = rserpool::decode(&buf[..n], PPID_ASAP).unwrap();

        let mut table = RegistrarTable::new(5_000_000);
        assert!(handle_announce(&mut table, &message, source, 1));
        assert_eq!(table.identify(&advertised), 0xabc);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
