// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed ASAP connection to a pool element or pool user.

use rserpool::handlespace::ConnectionId;
use rserpool::message::constants::PPID_ASAP;
use rserpool::transport::{encode_frame, FrameBuffer};
use rserpool::{encode, RserpoolMessage};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

/// A connected ASAP endpoint.
pub struct ClientConnection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    frames: FrameBuffer,
    read_buffer: Vec<u8>,
}

impl ClientConnection {
    /// Create a new client connection.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        max_message_size: usize,
    ) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            frames: FrameBuffer::new(max_message_size),
            read_buffer: vec![0u8; READ_CHUNK],
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the next frame as `(ppid, payload)`.
    ///
    /// Returns `Ok(None)` if the connection is closed gracefully. Cancel-safe:
    /// bytes are only buffered once a read completes.
    pub async fn read_frame(&mut self) -> Result<Option<(u32, Vec<u8>)>, ConnectionError> {
        loop {
            if let Some(frame) = self
                .frames
                .next_frame()
                .map_err(|e| ConnectionError::Protocol(e.to_string()))?
            {
                return Ok(Some(frame));
            }
            let n = self
                .stream
                .read(&mut self.read_buffer)
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
            if n == 0 {
                if self.frames.pending() > 0 {
                    return Err(ConnectionError::Protocol(format!(
                        "connection closed inside a frame ({} bytes pending)",
                        self.frames.pending()
                    )));
                }
                return Ok(None);
            }
            self.frames.push(&self.read_buffer[..n]);
        }
    }

    /// Send a message to the client.
    pub async fn send_message(&mut self, msg: &RserpoolMessage) -> Result<(), ConnectionError> {
        let payload = encode(msg).map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        self.stream
            .write_all(&encode_frame(PPID_ASAP, &payload))
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }
}

/// Connection error types.
#[derive(Debug)]
pub enum ConnectionError {
    Io(String),
    Protocol(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {}", s),
            Self::Protocol(s) => write!(f, "Protocol error: {}", s),
        }
    }
}

impl std::error::Error for ConnectionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rserpool::PoolHandle;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let mut conn = ClientConnection::new(1, stream, peer, 65536);

        let message = RserpoolMessage::HandleResolution {
            pool_handle: PoolHandle::try_from("P").unwrap(),
            items: Some(2),
        };
        let frame = encode_frame(PPID_ASAP, &encode(&message).unwrap());
        let (head, tail) = frame.split_at(5);
        client.write_all(head).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.write_all(tail).await.unwrap();

        let (ppid, payload) = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(ppid, PPID_ASAP);
        assert_eq!(rserpool::decode(&payload, ppid).unwrap(), message);

        drop(client);
        assert!(conn.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let mut conn = ClientConnection::new(1, stream, peer, 65536);

        client.write_all(&[0, 0, 0, 40, 0, 0, 0, 11, 1]).await.unwrap();
        drop(client);
        assert!(matches!(
            conn.read_frame().await,
            Err(ConnectionError::Protocol(_))
        ));
    }
}
