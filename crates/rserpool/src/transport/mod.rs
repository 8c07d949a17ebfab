// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport shim consumed by the ASAP engine.
//!
//! A [`Transport`] is message-oriented: it connects, sends whole messages
//! tagged with a payload protocol identifier, and reports everything that
//! happens on its connections as [`TransportEvent`]s on a single channel.
//! The engine never touches sockets directly.

pub mod framing;
mod tcp;

pub use framing::{encode_frame, FrameBuffer, FrameError, FRAME_HEADER_SIZE};
pub use tcp::TcpTransport;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crossbeam::channel::Receiver;

pub use crate::handlespace::ConnectionId;

/// Something that happened on a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A complete message arrived.
    Message {
        conn: ConnectionId,
        ppid: u32,
        payload: Vec<u8>,
    },
    /// An inbound connection was accepted on a listening socket.
    Accepted {
        conn: ConnectionId,
        remote: SocketAddr,
    },
    /// The connection was closed by the peer or failed.
    Closed { conn: ConnectionId },
}

/// Connection-oriented, message-preserving transport.
pub trait Transport: Send + Sync {
    /// Connect to the first reachable candidate.
    ///
    /// Up to `parallelism` attempts run at once, each bounded by `timeout`;
    /// the first attempt to complete wins and the others are abandoned.
    fn connect(
        &self,
        candidates: &[SocketAddr],
        parallelism: usize,
        timeout: Duration,
    ) -> io::Result<(ConnectionId, SocketAddr)>;

    /// Send one message.
    fn send(&self, conn: ConnectionId, ppid: u32, payload: &[u8]) -> io::Result<()>;

    /// Close a connection. No `Closed` event is guaranteed afterwards.
    fn close(&self, conn: ConnectionId);

    /// Accept inbound connections on `addr`; returns the bound address.
    fn listen(&self, addr: SocketAddr) -> io::Result<SocketAddr>;

    /// Event stream shared by all connections of this transport.
    fn events(&self) -> Receiver<TransportEvent>;

    /// Close every connection and stop listening.
    fn shutdown(&self);
}
