//! Ship-side registry of streams awaiting frames from the offshore relay.
//!
//! One registry exists per physical link. Inbound frames are routed here by
//! correlation id; when the link goes away, `fail_all` resolves every entry.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use super::job::{ConnectReply, GatewayError, HttpReply};
use crate::http::response::parse_status;
use crate::observability::metrics;
use crate::protocol::{Frame, FrameType};
use crate::tunnel::{TunnelHandle, TunnelState};

/// A stream waiting on the offshore relay.
#[derive(Debug)]
pub enum PendingStream {
    Http(oneshot::Sender<HttpReply>),
    Tunnel(TunnelEntry),
}

/// A CONNECT stream: the acknowledgement sink until the first RESPONSE,
/// then just the relay handle.
#[derive(Debug)]
pub struct TunnelEntry {
    ack: Option<oneshot::Sender<ConnectReply>>,
    handle: TunnelHandle,
}

impl TunnelEntry {
    pub fn new(ack: oneshot::Sender<ConnectReply>, handle: TunnelHandle) -> Self {
        Self {
            ack: Some(ack),
            handle,
        }
    }

    /// Fail the acknowledgement if still pending, otherwise close the local
    /// socket (writing `notice` first if given).
    fn fail(mut self, error: GatewayError, notice: Option<Bytes>) {
        match self.ack.take() {
            Some(ack) => {
                let _ = ack.send(Err(error));
                self.handle.close();
            }
            None => match notice {
                Some(notice) => {
                    self.handle.abort(notice);
                }
                None => {
                    self.handle.close();
                }
            },
        }
    }
}

impl PendingStream {
    fn fail(self, error: GatewayError, notice: Option<Bytes>) {
        match self {
            PendingStream::Http(reply) => {
                let _ = reply.send(Err(error));
            }
            PendingStream::Tunnel(entry) => entry.fail(error, notice),
        }
    }

    fn is_tunnel_for(&self, state: &Arc<TunnelState>) -> bool {
        matches!(self, PendingStream::Tunnel(entry) if Arc::ptr_eq(entry.handle.state(), state))
    }
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Delivered,
    /// No live stream has that id.
    Unknown,
    /// The frame type is never valid in this direction.
    Discarded,
}

/// Correlation id → pending stream, shared between the session and its
/// tunnel relays.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    entries: Arc<DashMap<u32, PendingStream>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u32, stream: PendingStream) {
        self.entries.insert(id, stream);
        metrics::record_pending_streams(self.entries.len());
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&self, id: u32) -> Option<PendingStream> {
        let removed = self.entries.remove(&id).map(|(_, stream)| stream);
        if removed.is_some() {
            metrics::record_pending_streams(self.entries.len());
        }
        removed
    }

    /// Remove the tunnel entry owning `state`, if it is still registered.
    pub fn remove_tunnel(&self, id: u32, state: &Arc<TunnelState>) -> bool {
        let removed = self
            .entries
            .remove_if(&id, |_, stream| stream.is_tunnel_for(state))
            .is_some();
        if removed {
            metrics::record_pending_streams(self.entries.len());
        }
        removed
    }

    /// Fail a registered stream (used when its REQUEST never made it out).
    pub fn fail(&self, id: u32, error: GatewayError) {
        if let Some(stream) = self.remove(id) {
            stream.fail(error, None);
        }
    }

    /// Resolve every entry after the link went away.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<u32> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some(stream) = self.remove(id) {
                stream.fail(GatewayError::LinkLost, None);
                failed += 1;
            }
        }
        failed
    }

    /// Route one inbound frame from the offshore relay.
    pub fn deliver(&self, frame: Frame) -> Routed {
        let id = frame.correlation_id;
        match frame.kind {
            FrameType::Response => self.on_response(id, frame.payload),
            FrameType::TunnelData => self.on_tunnel_data(id, frame.payload),
            FrameType::TunnelClose => self.on_tunnel_close(id),
            FrameType::Error => self.on_error(id, frame.payload_text()),
            FrameType::Request | FrameType::TunnelOpen => {
                tracing::debug!(
                    correlation_id = id,
                    frame_type = %frame.kind,
                    "Discarding frame not valid from offshore"
                );
                Routed::Discarded
            }
        }
    }

    fn on_response(&self, id: u32, payload: Bytes) -> Routed {
        let http = self
            .entries
            .remove_if(&id, |_, stream| matches!(stream, PendingStream::Http(_)));
        if let Some((_, PendingStream::Http(reply))) = http {
            metrics::record_pending_streams(self.entries.len());
            let _ = reply.send(Ok(payload));
            return Routed::Delivered;
        }

        let refused = {
            let mut entry = match self.entries.get_mut(&id) {
                Some(entry) => entry,
                None => {
                    tracing::debug!(correlation_id = id, "RESPONSE for unknown stream");
                    return Routed::Unknown;
                }
            };
            let tunnel = match entry.value_mut() {
                PendingStream::Tunnel(tunnel) => tunnel,
                PendingStream::Http(_) => return Routed::Unknown,
            };
            match tunnel.ack.take() {
                None => {
                    tunnel.handle.deliver(payload);
                    return Routed::Delivered;
                }
                Some(ack) => match parse_status(&payload) {
                    Ok(status) if status.is_success() => {
                        let _ = ack.send(Ok(status));
                        return Routed::Delivered;
                    }
                    Ok(status) => {
                        let _ = ack.send(Err(GatewayError::Offshore(format!(
                            "tunnel refused with status {}",
                            status
                        ))));
                        true
                    }
                    Err(e) => {
                        let _ = ack.send(Err(GatewayError::MalformedResponse(e)));
                        true
                    }
                },
            }
        };

        if refused {
            if let Some(PendingStream::Tunnel(entry)) = self.remove(id) {
                entry.handle.close();
            }
        }
        Routed::Delivered
    }

    fn on_tunnel_data(&self, id: u32, payload: Bytes) -> Routed {
        match self.entries.get(&id).as_deref() {
            Some(PendingStream::Tunnel(tunnel)) => {
                tunnel.handle.deliver(payload);
                Routed::Delivered
            }
            _ => {
                tracing::debug!(correlation_id = id, "TUNNEL_DATA for unknown stream");
                Routed::Unknown
            }
        }
    }

    fn on_tunnel_close(&self, id: u32) -> Routed {
        let removed = self
            .entries
            .remove_if(&id, |_, stream| matches!(stream, PendingStream::Tunnel(_)));
        match removed {
            Some((_, PendingStream::Tunnel(entry))) => {
                metrics::record_pending_streams(self.entries.len());
                entry.fail(
                    GatewayError::Offshore("tunnel closed before it was established".into()),
                    None,
                );
                Routed::Delivered
            }
            _ => {
                tracing::debug!(correlation_id = id, "TUNNEL_CLOSE for unknown stream");
                Routed::Unknown
            }
        }
    }

    fn on_error(&self, id: u32, message: String) -> Routed {
        match self.remove(id) {
            Some(stream) => {
                tracing::debug!(correlation_id = id, error = %message, "Offshore reported stream error");
                let notice = Bytes::from(format!("HTTP/1.1 502 Bad Gateway\r\n\r\n{}", message));
                stream.fail(GatewayError::Offshore(message), Some(notice));
                Routed::Delivered
            }
            None => {
                tracing::warn!(correlation_id = id, error = %message, "Offshore error for unknown stream");
                Routed::Unknown
            }
        }
    }
}
