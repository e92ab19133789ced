//! Per-ship frame routing on the offshore relay.
//!
//! # Responsibilities
//! - Route inbound frames by type and correlation id
//! - Run every REQUEST on its own task (CONNECT or forwarded HTTP)
//! - Own the active tunnel map for one ship connection
//! - Report any stream failure, panics included, as an ERROR frame
//!
//! # Design Decisions
//! - Stream failures never end the ship connection
//! - Tunnel teardown is decided by the tunnel state machine, so an upstream
//!   EOF racing a TUNNEL_CLOSE from the ship yields one close and one removal
//! - A CONNECT is registered before its upstream dial starts, so a
//!   TUNNEL_CLOSE sent during the dial still finds it
//! - Closing the router cancels in-flight streams

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::forwarder::{ForwardError, HttpForwarder};
use crate::error::{LinkError, ProtocolError};
use crate::http::request::FramedRequest;
use crate::link::FrameSink;
use crate::net::LinkId;
use crate::observability::metrics;
use crate::protocol::{Frame, FrameType, CONNECTION_ESTABLISHED};
use crate::ship::Routed;
use crate::tunnel::{self, TunnelEnd, TunnelHandle, TunnelRelay, TunnelState};

/// Failure of one stream. The display text is the ERROR frame payload.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Connect error: {authority}: {source}")]
    UpstreamConnect {
        authority: String,
        #[source]
        source: io::Error,
    },

    #[error("Connect error: {0}: timed out")]
    ConnectTimeout(String),

    #[error("Remote connection error: {0}")]
    Remote(io::Error),

    #[error("Upstream error: {0}")]
    Forward(#[from] ForwardError),

    #[error("Server internal error: {0}")]
    BadRequest(#[from] ProtocolError),

    #[error("Server internal error: {0}")]
    Internal(String),

    #[error("Server internal error: {0}")]
    Link(#[from] LinkError),
}

impl RouterError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::UpstreamConnect { .. } | RouterError::ConnectTimeout(_) => "connect",
            RouterError::Remote(_) => "remote",
            RouterError::Forward(_) => "upstream",
            RouterError::BadRequest(_) => "bad_request",
            RouterError::Internal(_) | RouterError::Link(_) => "internal",
        }
    }
}

/// Routes the frames of one ship connection. Cheap to clone; clones share
/// the tunnel map.
#[derive(Debug, Clone)]
pub struct DownlinkRouter {
    link: LinkId,
    sink: FrameSink,
    tunnels: Arc<DashMap<u32, TunnelHandle>>,
    cancel: Arc<watch::Sender<bool>>,
    forwarder: HttpForwarder,
    connect_timeout: Duration,
    read_chunk: usize,
}

impl DownlinkRouter {
    pub fn new(
        link: LinkId,
        sink: FrameSink,
        forwarder: HttpForwarder,
        connect_timeout: Duration,
        read_chunk: usize,
    ) -> Self {
        Self {
            link,
            sink,
            tunnels: Arc::new(DashMap::new()),
            cancel: Arc::new(watch::channel(false).0),
            forwarder,
            connect_timeout,
            read_chunk,
        }
    }

    /// Number of live tunnels.
    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Route one frame from the ship. Never blocks on upstream I/O.
    pub fn route(&self, frame: Frame) -> Routed {
        let id = frame.correlation_id;
        match frame.kind {
            FrameType::Request => {
                match FramedRequest::parse(&frame.payload) {
                    Ok(request) if request.is_connect() => {
                        let authority = request.connect_authority();
                        let relay = self.reserve_tunnel(id);
                        let router = self.clone();
                        self.spawn_stream(id, async move { router.open_tunnel(id, authority, relay).await });
                    }
                    Ok(request) => {
                        let router = self.clone();
                        self.spawn_stream(id, async move { router.forward(id, request).await });
                    }
                    Err(e) => self.spawn_stream(id, async move { Err(RouterError::from(e)) }),
                }
                Routed::Delivered
            }
            FrameType::TunnelData => match self.tunnels.get(&id) {
                Some(handle) => {
                    handle.deliver(frame.payload);
                    Routed::Delivered
                }
                None => {
                    tracing::debug!(link = %self.link, correlation_id = id, "TUNNEL_DATA for unknown tunnel");
                    Routed::Unknown
                }
            },
            FrameType::TunnelClose => match self.tunnels.remove(&id) {
                Some((_, handle)) => {
                    tracing::debug!(link = %self.link, correlation_id = id, "Ship closed tunnel");
                    handle.close();
                    Routed::Delivered
                }
                None => Routed::Unknown,
            },
            FrameType::Error => {
                tracing::warn!(
                    link = %self.link,
                    correlation_id = id,
                    error = %frame.payload_text(),
                    "Error frame from ship"
                );
                Routed::Delivered
            }
            FrameType::Response | FrameType::TunnelOpen => {
                tracing::debug!(
                    link = %self.link,
                    correlation_id = id,
                    frame_type = %frame.kind,
                    "Discarding frame not valid from ship"
                );
                Routed::Discarded
            }
        }
    }

    /// Close every tunnel of this connection and cancel streams still in
    /// flight. Returns the number of tunnels closed.
    pub fn close_all(&self) -> usize {
        self.cancel.send_replace(true);
        let ids: Vec<u32> = self.tunnels.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some((_, handle)) = self.tunnels.remove(&id) {
                handle.close();
                closed += 1;
            }
        }
        closed
    }

    /// Run one stream on its own task. Errors, including a panic in `work`,
    /// are sent back as an ERROR frame for `id`.
    fn spawn_stream<F>(&self, id: u32, work: F)
    where
        F: Future<Output = Result<(), RouterError>> + Send + 'static,
    {
        let router = self.clone();
        let mut cancelled = self.cancel.subscribe();
        tokio::spawn(async move {
            let mut handler = tokio::spawn(work);
            let outcome = tokio::select! {
                joined = &mut handler => match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(RouterError::Internal(format!("stream task failed: {}", e))),
                },
                _ = cancelled.wait_for(|cancelled| *cancelled) => {
                    handler.abort();
                    tracing::debug!(link = %router.link, correlation_id = id, "Stream cancelled");
                    return;
                }
            };

            if let Err(e) = outcome {
                tracing::warn!(link = %router.link, correlation_id = id, error = %e, "Stream failed");
                metrics::record_stream_error(e.kind());
                if let Err(send_error) = router.sink.send(Frame::error(id, &e)).await {
                    tracing::debug!(
                        link = %router.link,
                        correlation_id = id,
                        error = %send_error,
                        "Could not report stream error"
                    );
                }
            }
        });
    }

    async fn forward(&self, id: u32, request: FramedRequest) -> Result<(), RouterError> {
        tracing::debug!(
            link = %self.link,
            correlation_id = id,
            method = %request.method,
            target = %request.target,
            "Forwarding request"
        );
        let response = self.forwarder.forward(request).await?;
        self.sink.send(Frame::response(id, response)).await?;
        Ok(())
    }

    /// Register the tunnel for `id` ahead of its upstream dial.
    fn reserve_tunnel(&self, id: u32) -> TunnelRelay {
        let (handle, relay) = tunnel::channel(id);
        if let Some(stale) = self.tunnels.insert(id, handle) {
            tracing::warn!(link = %self.link, correlation_id = id, "Replacing tunnel with reused id");
            stale.close();
        }
        relay
    }

    /// Connect upstream, acknowledge, and relay until either side closes.
    async fn open_tunnel(&self, id: u32, authority: String, relay: TunnelRelay) -> Result<(), RouterError> {
        let state = relay.state();
        tracing::debug!(link = %self.link, correlation_id = id, authority = %authority, "Opening tunnel");
        let dialed = tokio::time::timeout(self.connect_timeout, TcpStream::connect(authority.as_str())).await;
        let upstream = match dialed {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return self.abandon_tunnel(id, &state, RouterError::UpstreamConnect { authority, source })
            }
            Err(_) => return self.abandon_tunnel(id, &state, RouterError::ConnectTimeout(authority)),
        };
        if !state.is_open() {
            tracing::debug!(link = %self.link, correlation_id = id, "Ship closed tunnel during connect");
            state.mark_closed();
            return Ok(());
        }
        let _ = upstream.set_nodelay(true);

        if let Err(e) = self.sink.send(Frame::response(id, Bytes::from_static(CONNECTION_ESTABLISHED))).await {
            self.remove_own(id, &state);
            state.mark_closed();
            return Err(e.into());
        }

        let end = relay.run(upstream, &self.sink, self.read_chunk).await;
        let result = if end.is_local() && state.begin_closing() {
            self.remove_own(id, &state);
            match end {
                TunnelEnd::Failed(e) => Err(RouterError::Remote(e)),
                _ => {
                    self.sink.send(Frame::tunnel_close(id)).await?;
                    Ok(())
                }
            }
        } else {
            Ok(())
        };
        state.mark_closed();
        result
    }

    /// Drop a tunnel whose dial failed. The failure is only reported if the
    /// ship has not closed the tunnel meanwhile.
    fn abandon_tunnel(&self, id: u32, state: &Arc<TunnelState>, error: RouterError) -> Result<(), RouterError> {
        self.remove_own(id, state);
        let report = state.begin_closing();
        state.mark_closed();
        if report {
            Err(error)
        } else {
            tracing::debug!(link = %self.link, correlation_id = id, error = %error, "Dial failed after ship closed tunnel");
            Ok(())
        }
    }

    fn remove_own(&self, id: u32, state: &Arc<TunnelState>) {
        self.tunnels
            .remove_if(&id, |_, handle| Arc::ptr_eq(handle.state(), state));
    }
}
