// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message-boundary framing for RSerPool over TCP.
//!
//! TCP has no record boundaries and no payload protocol identifier, so each
//! message is prefixed with both:
//!
//! ```text
//! +----------------+----------------+------------------+
//! | Length (4B BE) | PPID (4B BE)   | RSerPool message |
//! +----------------+----------------+------------------+
//! ```
//!
//! The length counts the message only, not the 8-byte header.

use std::fmt;

/// Frame header size: length + payload protocol identifier.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Default maximum message size accepted from the wire.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65536;

/// Framing errors; the stream is unusable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Announced message exceeds the configured maximum.
    TooLarge { size: usize, max: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "Frame too large: {} bytes (max {})", size, max)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Frame one message.
pub fn encode_frame(ppid: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&ppid.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Accumulates stream bytes until complete frames are available.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    max_size: usize,
    frames_decoded: u64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_size,
            frames_decoded: 0,
        }
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held for an incomplete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Take the next complete frame as `(ppid, message)`.
    ///
    /// Returns `Ok(None)` while the frame is still partial.
    pub fn next_frame(&mut self) -> Result<Option<(u32, Vec<u8>)>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let b = &self.buffer;
        let size = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
        if size > self.max_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_size,
            });
        }
        if b.len() < FRAME_HEADER_SIZE + size {
            return Ok(None);
        }
        let ppid = u32::from_be_bytes([b[4], b[5], b[6], b[7]]);
        let payload = b[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + size].to_vec();
        self.buffer.drain(..FRAME_HEADER_SIZE + size);
        self.frames_decoded += 1;
        Ok(Some((ppid, payload)))
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_then_complete() {
        let frame = encode_frame(11, b"\x01\x00\x00\x04");
        let mut fb = FrameBuffer::default();
        fb.push(&frame[..5]);
        assert_eq!(fb.next_frame().unwrap(), None);
        fb.push(&frame[5..]);
        assert_eq!(
            fb.next_frame().unwrap(),
            Some((11, b"\x01\x00\x00\x04".to_vec()))
        );
        assert_eq!(fb.pending(), 0);
        assert_eq!(fb.frames_decoded(), 1);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut bytes = encode_frame(11, b"abcd");
        bytes.extend(encode_frame(12, b"efgh"));
        bytes.extend(&encode_frame(11, b"ij")[..6]);
        let mut fb = FrameBuffer::default();
        fb.push(&bytes);
        assert_eq!(fb.next_frame().unwrap(), Some((11, b"abcd".to_vec())));
        assert_eq!(fb.next_frame().unwrap(), Some((12, b"efgh".to_vec())));
        assert_eq!(fb.next_frame().unwrap(), None);
        assert_eq!(fb.pending(), 6);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut fb = FrameBuffer::new(16);
        fb.push(&encode_frame(11, &[0u8; 17]));
        assert_eq!(
            fb.next_frame(),
            Err(FrameError::TooLarge { size: 17, max: 16 })
        );
    }
}
