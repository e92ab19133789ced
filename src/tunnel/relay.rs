//! Bidirectional byte pump between one socket and the multiplexed link.
//!
//! The link side talks to a running relay only through its `TunnelHandle`
//! (an unbounded command queue), so frame routing never waits on a slow
//! socket. The socket side pushes TUNNEL_DATA frames through the link's
//! bounded `FrameSink`, so a slow link pauses socket reads.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::state::TunnelState;
use crate::link::FrameSink;
use crate::observability::metrics;
use crate::protocol::Frame;

/// Instruction from the link side to a relay.
#[derive(Debug)]
pub enum TunnelCommand {
    /// Write these bytes to the socket.
    Data(Bytes),
    /// Peer closed the tunnel; shut the socket down.
    Close,
    /// Write a final notice, then shut the socket down.
    Abort(Bytes),
}

/// Why a relay stopped.
#[derive(Debug)]
pub enum TunnelEnd {
    /// The socket reached end-of-stream.
    Eof,
    /// Reading from or writing to the socket failed.
    Failed(io::Error),
    /// The peer closed (or aborted) the tunnel over the link.
    ClosedByPeer,
    /// The link went away, or every handle was dropped.
    LinkLost,
}

impl TunnelEnd {
    /// Whether the socket side triggered the close. Only then does this
    /// side owe the peer a closing frame.
    pub fn is_local(&self) -> bool {
        matches!(self, TunnelEnd::Eof | TunnelEnd::Failed(_))
    }
}

/// Link-side handle to a tunnel relay.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    id: u32,
    commands: mpsc::UnboundedSender<TunnelCommand>,
    state: Arc<TunnelState>,
}

impl TunnelHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> &Arc<TunnelState> {
        &self.state
    }

    /// Queue bytes for the socket. Dropped once the tunnel is closing.
    pub fn deliver(&self, data: Bytes) -> bool {
        if !self.state.is_open() {
            return false;
        }
        self.commands.send(TunnelCommand::Data(data)).is_ok()
    }

    /// Close the socket on behalf of the peer. Idempotent; returns `true`
    /// only for the call that actually started the close.
    pub fn close(&self) -> bool {
        if !self.state.begin_closing() {
            return false;
        }
        let _ = self.commands.send(TunnelCommand::Close);
        true
    }

    /// Like `close`, but writes `notice` to the socket first.
    pub fn abort(&self, notice: Bytes) -> bool {
        if !self.state.begin_closing() {
            return false;
        }
        let _ = self.commands.send(TunnelCommand::Abort(notice));
        true
    }
}

/// Socket-side half of a tunnel, consumed by `run`.
#[derive(Debug)]
pub struct TunnelRelay {
    id: u32,
    commands: mpsc::UnboundedReceiver<TunnelCommand>,
    state: Arc<TunnelState>,
}

/// Create the two halves of a tunnel for `id`.
pub fn channel(id: u32) -> (TunnelHandle, TunnelRelay) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = Arc::new(TunnelState::new());
    (
        TunnelHandle {
            id,
            commands: tx,
            state: Arc::clone(&state),
        },
        TunnelRelay {
            id,
            commands: rx,
            state,
        },
    )
}

impl TunnelRelay {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> Arc<TunnelState> {
        Arc::clone(&self.state)
    }

    #[cfg(test)]
    pub(crate) fn commands_mut(&mut self) -> &mut mpsc::UnboundedReceiver<TunnelCommand> {
        &mut self.commands
    }

    /// Pump bytes until either side ends. The socket's write half is shut
    /// down before returning.
    ///
    /// Commands queued before `run` is called (data that raced ahead of the
    /// socket becoming available) are delivered first, in order.
    pub async fn run<S>(mut self, socket: S, link: &FrameSink, read_chunk: usize) -> TunnelEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let id = self.id;
        let (mut rd, mut wr) = tokio::io::split(socket);
        let mut buf = vec![0u8; read_chunk.max(1)];

        metrics::tunnel_opened();
        tracing::debug!(correlation_id = id, "Tunnel relay started");

        let end = loop {
            tokio::select! {
                read = rd.read(&mut buf) => match read {
                    Ok(0) => break TunnelEnd::Eof,
                    Ok(n) => {
                        let frame = Frame::tunnel_data(id, Bytes::copy_from_slice(&buf[..n]));
                        if link.send(frame).await.is_err() {
                            break TunnelEnd::LinkLost;
                        }
                    }
                    Err(e) => break TunnelEnd::Failed(e),
                },
                command = self.commands.recv() => match command {
                    Some(TunnelCommand::Data(data)) => {
                        if let Err(e) = wr.write_all(&data).await {
                            break TunnelEnd::Failed(e);
                        }
                    }
                    Some(TunnelCommand::Abort(notice)) => {
                        let _ = wr.write_all(&notice).await;
                        break TunnelEnd::ClosedByPeer;
                    }
                    Some(TunnelCommand::Close) => break TunnelEnd::ClosedByPeer,
                    None => break TunnelEnd::LinkLost,
                },
            }
        };

        let _ = wr.shutdown().await;
        metrics::tunnel_closed();
        tracing::debug!(correlation_id = id, end = ?end, "Tunnel relay stopped");
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameType;
    use std::time::Duration;

    #[tokio::test]
    async fn socket_bytes_become_tunnel_data_frames() {
        let (sink, mut frames) = FrameSink::channel(8, 1024);
        let (handle, relay) = channel(3);
        let (mut local, remote) = tokio::io::duplex(64);

        let task = tokio::spawn(async move { relay.run(remote, &sink, 16).await });

        local.write_all(b"abc").await.unwrap();
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.kind, FrameType::TunnelData);
        assert_eq!(frame.correlation_id, 3);
        assert_eq!(&frame.payload[..], b"abc");

        drop(local);
        let end = task.await.unwrap();
        assert!(matches!(end, TunnelEnd::Eof));
        assert!(end.is_local());
        assert!(handle.state().is_open());
    }

    #[tokio::test]
    async fn delivered_data_reaches_socket_before_close() {
        let (sink, _frames) = FrameSink::channel(8, 1024);
        let (handle, relay) = channel(4);
        let (mut local, remote) = tokio::io::duplex(64);

        // Queued before the relay runs, as happens while a CONNECT upgrade
        // is still pending.
        assert!(handle.deliver(Bytes::from_static(b"early ")));
        assert!(handle.deliver(Bytes::from_static(b"bytes")));
        assert!(handle.close());
        assert!(!handle.close());
        assert!(!handle.deliver(Bytes::from_static(b"late")));

        let end = relay.run(remote, &sink, 16).await;
        assert!(matches!(end, TunnelEnd::ClosedByPeer));

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), local.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"early bytes");
    }

    #[tokio::test]
    async fn abort_writes_notice() {
        let (sink, _frames) = FrameSink::channel(8, 1024);
        let (handle, relay) = channel(5);
        let (mut local, remote) = tokio::io::duplex(64);

        assert!(handle.abort(Bytes::from_static(b"HTTP/1.1 502 Bad Gateway\r\n\r\nboom")));
        let end = relay.run(remote, &sink, 16).await;
        assert!(!end.is_local());

        let mut received = Vec::new();
        local.read_to_end(&mut received).await.unwrap();
        assert!(received.ends_with(b"boom"));
    }
}
