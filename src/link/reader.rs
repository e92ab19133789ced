//! Inbound side of a link.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{LinkError, ProtocolError, Result};
use crate::observability::metrics;
use crate::protocol::{Frame, FrameBuffer};

/// Reads frames from the read half of a link.
pub struct FrameReader<R> {
    inner: R,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_payload: u32, read_chunk_size: usize) -> Self {
        Self {
            inner,
            buffer: FrameBuffer::with_max_payload(max_payload),
            chunk: vec![0u8; read_chunk_size.max(1)],
        }
    }

    /// Next complete frame, or `Ok(None)` on a clean close between frames.
    ///
    /// Cancel-safe: bytes are only moved into the frame buffer after a read
    /// completes, so dropping this future loses nothing.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.buffer.try_take()? {
                metrics::record_frame_received(frame.kind);
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(LinkError::Protocol(ProtocolError::Truncated(self.buffer.len())));
            }
            self.buffer.extend(&self.chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_frames_across_small_reads() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 1024, 3);

        let frame = Frame::response(11, Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\n"));
        let wire = frame.to_bytes();
        tokio::spawn(async move {
            client.write_all(&wire).await.unwrap();
        });

        assert_eq!(reader.next_frame().await.unwrap(), Some(frame));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_mid_frame_is_a_protocol_error() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 1024, 64);

        let wire = Frame::tunnel_data(1, Bytes::from_static(b"abcdef")).to_bytes();
        client.write_all(&wire[..12]).await.unwrap();
        drop(client);

        let err = reader.next_frame().await.unwrap_err();
        assert!(matches!(err, LinkError::Protocol(ProtocolError::Truncated(12))));
    }
}
