//! Outbound side of a link: the frame sink and its writer task.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{LinkError, Result};
use crate::observability::metrics;
use crate::protocol::Frame;

/// Most frames coalesced into one socket write.
const MAX_BATCH: usize = 32;

/// Cloneable handle for queueing frames onto one physical link.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
    max_payload: u32,
}

impl FrameSink {
    /// Create a sink and the receiving end its writer drains.
    pub fn channel(depth: usize, max_payload: u32) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx, max_payload }, rx)
    }

    /// Queue a frame for the writer.
    ///
    /// Waits while the writer queue is full. Fails without queueing anything
    /// if the payload is over the limit or the writer is gone.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if frame.len() > self.max_payload as usize {
            return Err(LinkError::FrameTooLarge {
                length: frame.len(),
                limit: self.max_payload,
            });
        }
        self.tx.send(frame).await.map_err(|_| LinkError::WriterStopped)
    }

    /// Whether the writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }
}

/// Spawn the task that owns the write half of a link.
///
/// The task ends with `Ok(())` once every sink clone is dropped, or with the
/// first write error. Either way the receiver is dropped, so later sends
/// fail with `LinkError::WriterStopped`.
pub fn spawn_writer<W>(mut writer: W, mut frames: mpsc::Receiver<Frame>) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(64 * 1024);

        while let Some(frame) = frames.recv().await {
            metrics::record_frame_sent(frame.kind);
            frame.encode(&mut buf);

            // Coalesce whatever else is already queued.
            let mut batched = 1;
            while batched < MAX_BATCH {
                match frames.try_recv() {
                    Ok(next) => {
                        metrics::record_frame_sent(next.kind);
                        next.encode(&mut buf);
                        batched += 1;
                    }
                    Err(_) => break,
                }
            }

            writer.write_all(&buf).await?;
            writer.flush().await?;
            buf.clear();
        }

        let _ = writer.shutdown().await;
        Ok::<(), LinkError>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn writer_preserves_send_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (sink, rx) = FrameSink::channel(8, 1024);
        let writer = spawn_writer(client, rx);

        sink.send(Frame::request(1, Bytes::from_static(b"one"))).await.unwrap();
        sink.send(Frame::tunnel_data(2, Bytes::from_static(b"two"))).await.unwrap();
        sink.send(Frame::tunnel_close(2)).await.unwrap();
        drop(sink);
        writer.await.unwrap().unwrap();

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let frames = FrameBuffer::new().push(&raw).unwrap();
        let ids: Vec<_> = frames.iter().map(|f| (f.kind, f.correlation_id)).collect();
        assert_eq!(
            ids,
            vec![
                (crate::protocol::FrameType::Request, 1),
                (crate::protocol::FrameType::TunnelData, 2),
                (crate::protocol::FrameType::TunnelClose, 2),
            ]
        );
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (sink, _rx) = FrameSink::channel(1, 4);
        let err = sink
            .send(Frame::response(1, Bytes::from_static(b"too long")))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLarge { length: 8, limit: 4 }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn send_fails_after_writer_is_gone() {
        let (sink, rx) = FrameSink::channel(1, 1024);
        drop(rx);
        let err = sink.send(Frame::tunnel_close(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::WriterStopped));
        assert!(sink.is_closed());
    }
}
