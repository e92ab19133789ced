//! Offshore accept loop: one isolated router per ship connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::forwarder::HttpForwarder;
use super::router::DownlinkRouter;
use crate::config::RelayConfig;
use crate::error::LinkError;
use crate::link::{spawn_writer, FrameReader, FrameSink};
use crate::net::{Accepted, ConnectionPermit, LinkId, Listener, ListenerError};
use crate::observability::metrics;
use crate::protocol::Frame;

/// How long a closing ship connection waits for queued frames to flush.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Accepts ship links and serves each on its own task.
#[derive(Debug, Clone)]
pub struct OffshoreServer {
    forwarder: HttpForwarder,
    connect_timeout: Duration,
    max_frame_payload: u32,
    write_queue_depth: usize,
    read_chunk_size: usize,
}

impl OffshoreServer {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            forwarder: HttpForwarder::new(
                config.timeouts.connect(),
                config.timeouts.request(),
                config.offshore.max_response_body,
            ),
            connect_timeout: config.timeouts.connect(),
            max_frame_payload: config.link.max_frame_payload,
            write_queue_depth: config.link.write_queue_depth,
            read_chunk_size: config.link.read_chunk_size,
        }
    }

    /// Accept ship connections until shutdown.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        tracing::info!(address = %listener.local_addr(), "Offshore relay listening for ships");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let Accepted { stream, peer, permit } = match accepted {
                Ok(accepted) => accepted,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Failed to accept ship connection");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let server = self.clone();
            let shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                server.serve_ship(stream, peer, permit, shutdown).await;
            });
        }

        tracing::info!("Offshore relay stopped");
        Ok(())
    }

    async fn serve_ship(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        _permit: ConnectionPermit,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let link = LinkId::new();
        tracing::info!(link = %link, peer_addr = %peer, "Ship connected");
        metrics::ship_connected();

        let (read_half, write_half) = stream.into_split();
        let (sink, frames) = FrameSink::channel(self.write_queue_depth, self.max_frame_payload);
        let mut writer = spawn_writer(write_half, frames);
        let mut reader = FrameReader::new(read_half, self.max_frame_payload, self.read_chunk_size);
        let router = DownlinkRouter::new(
            link,
            sink.clone(),
            self.forwarder.clone(),
            self.connect_timeout,
            self.read_chunk_size,
        );

        let result: Result<(), LinkError> = loop {
            tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                frame = reader.next_frame() => match frame {
                    Ok(Some(frame)) => {
                        router.route(frame);
                    }
                    Ok(None) => break Ok(()),
                    Err(LinkError::Protocol(e)) => {
                        let _ = sink.send(Frame::error(0, format!("Server internal error: {}", e))).await;
                        break Err(LinkError::Protocol(e));
                    }
                    Err(e) => break Err(e),
                },
                result = &mut writer => {
                    break match result {
                        Ok(Err(e)) => Err(e),
                        _ => Err(LinkError::WriterStopped),
                    };
                }
            }
        };

        let closed = router.close_all();
        drop(router);
        drop(sink);
        if !writer.is_finished() && tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }

        match result {
            Ok(()) => tracing::info!(link = %link, tunnels_closed = closed, "Ship disconnected"),
            Err(e) => tracing::warn!(link = %link, tunnels_closed = closed, error = %e, "Ship connection failed"),
        }
        metrics::ship_disconnected();
    }
}
