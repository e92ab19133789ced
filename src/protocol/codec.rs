//! Incremental frame decoder.
//!
//! Transport reads arrive in arbitrary chunks that need not line up with
//! frame boundaries. `FrameBuffer` is a growable byte queue: chunks are
//! appended, complete frames are taken off the front, and whatever is left
//! over (at most one incomplete frame) stays buffered for the next read.

use bytes::{Buf, BytesMut};

use super::frame::{Frame, FrameType, HEADER_LEN};
use crate::error::ProtocolError;

/// Default upper bound on a single frame payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Buffer accumulating link bytes and yielding complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    max_payload: u32,
}

impl FrameBuffer {
    /// Create a buffer with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a buffer rejecting payloads larger than `max_payload`.
    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            max_payload,
        }
    }

    /// Append a chunk and take every frame it completes, in arrival order.
    ///
    /// On error the buffer is left as it was at the failing frame; the
    /// connection is expected to be dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, ProtocolError> {
        self.extend(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_take()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Append a chunk without decoding.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take one complete frame off the front of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. The header is validated
    /// as soon as it is visible, so an oversized or unknown frame fails before
    /// its payload is buffered.
    pub fn try_take(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if length > self.max_payload {
            return Err(ProtocolError::Oversized {
                length,
                limit: self.max_payload,
            });
        }
        let kind = FrameType::try_from(self.buffer[4])?;

        let total = HEADER_LEN + length as usize;
        if self.buffer.len() < total {
            // Make room for the rest of this frame in one allocation.
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        let mut header = self.buffer.split_to(HEADER_LEN);
        header.advance(5);
        let correlation_id = header.get_u32();
        let payload = self.buffer.split_to(length as usize).freeze();

        Ok(Some(Frame {
            kind,
            correlation_id,
            payload,
        }))
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
