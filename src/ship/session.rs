//! The ship's single uplink to the offshore relay.
//!
//! # Responsibilities
//! - Own the physical connection and reconnect forever with a fixed delay
//! - Dispatch queued jobs as REQUEST frames, one at a time
//! - Allocate correlation ids and keep the stream registry
//! - Route inbound frames; fail every pending stream when the link drops
//!
//! # Design Decisions
//! - A job is finished dispatching once its REQUEST frame is queued on the
//!   link; tunnels run on their own tasks and never hold up the next job
//! - Correlation ids belong to the session, not to a link, so ids keep
//!   increasing across reconnects

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::job::{ConnectJob, GatewayError, HttpJob, Job, JobReceiver, PendingSocket};
use super::registry::{PendingStream, StreamRegistry, TunnelEntry};
use crate::config::{LinkConfig, RelayConfig, ShipConfig};
use crate::error::{LinkError, Result};
use crate::http::request::{serialize_connect, serialize_request};
use crate::link::{spawn_writer, FrameReader, FrameSink};
use crate::net::{link_status, LinkId, LinkState, LinkStateTx, LinkStatus};
use crate::observability::metrics;
use crate::protocol::Frame;
use crate::resilience::backoff::reconnect_delay;
use crate::tunnel::{self, TunnelEnd, TunnelRelay};

/// Allocates correlation ids: 1, 2, ... wrapping past `u32::MAX`, never 0,
/// never an id that is still live in the registry.
#[derive(Debug)]
pub struct CorrelationIds {
    next: u32,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    pub fn allocate(&mut self, live: &StreamRegistry) -> u32 {
        loop {
            let id = self.next;
            self.next = match self.next.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if id != 0 && !live.contains(id) {
                return id;
            }
        }
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// How one physical link ended.
enum LinkOutcome {
    Shutdown,
    Lost(LinkError),
}

/// Owns the uplink for the lifetime of the ship process.
pub struct UplinkSession {
    ship: ShipConfig,
    link: LinkConfig,
    connect_timeout: Duration,
    jobs: JobReceiver,
    ids: CorrelationIds,
    state: LinkStateTx,
}

impl UplinkSession {
    pub fn new(config: &RelayConfig, jobs: JobReceiver) -> (Self, LinkStatus) {
        let (state, status) = link_status();
        let session = Self {
            ship: config.ship.clone(),
            link: config.link.clone(),
            connect_timeout: config.timeouts.connect(),
            jobs,
            ids: CorrelationIds::new(),
            state,
        };
        (session, status)
    }

    /// Connect, serve, back off, repeat until shutdown. Jobs still queued
    /// when the session stops are failed.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let address = self.ship.offshore_address.clone();

        loop {
            self.state.set(LinkState::Connecting);
            let connect = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address.as_str()));
            let connected = tokio::select! {
                _ = shutdown.recv() => break,
                result = connect => result,
            };

            match connected {
                Ok(Ok(stream)) => {
                    let link_id = LinkId::new();
                    tracing::info!(link = %link_id, offshore = %address, "Uplink connected");
                    self.state.set(LinkState::Connected(link_id));
                    metrics::record_link_connected(true);

                    let outcome = serve_link(
                        stream,
                        link_id,
                        &self.link,
                        &mut self.jobs,
                        &mut self.ids,
                        &mut shutdown,
                    )
                    .await;
                    metrics::record_link_connected(false);

                    match outcome {
                        LinkOutcome::Shutdown => break,
                        LinkOutcome::Lost(e) => {
                            tracing::warn!(link = %link_id, error = %e, "Uplink lost");
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(offshore = %address, error = %e, "Uplink connection failed");
                }
                Err(_) => {
                    tracing::warn!(
                        offshore = %address,
                        timeout_secs = self.connect_timeout.as_secs(),
                        "Uplink connection timed out"
                    );
                }
            }

            self.state.set(LinkState::Backoff);
            metrics::record_link_reconnect();
            let delay = reconnect_delay(self.ship.reconnect_delay(), self.ship.reconnect_jitter());
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.jobs.close(|| GatewayError::Stopped);
        self.state.set(LinkState::Stopped);
        tracing::info!("Uplink session stopped");
    }
}

async fn serve_link(
    stream: TcpStream,
    link_id: LinkId,
    config: &LinkConfig,
    jobs: &mut JobReceiver,
    ids: &mut CorrelationIds,
    shutdown: &mut broadcast::Receiver<()>,
) -> LinkOutcome {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let (sink, frames) = FrameSink::channel(config.write_queue_depth, config.max_frame_payload);
    let mut writer = spawn_writer(write_half, frames);
    let mut reader = FrameReader::new(read_half, config.max_frame_payload, config.read_chunk_size);

    let dispatcher = Dispatcher {
        link: link_id,
        sink,
        registry: StreamRegistry::new(),
        read_chunk: config.read_chunk_size,
    };

    let outcome = loop {
        tokio::select! {
            _ = shutdown.recv() => break LinkOutcome::Shutdown,
            frame = reader.next_frame() => match frame {
                Ok(Some(frame)) => {
                    dispatcher.registry.deliver(frame);
                }
                Ok(None) => break LinkOutcome::Lost(LinkError::Closed),
                Err(e) => break LinkOutcome::Lost(e),
            },
            job = jobs.recv() => match job {
                Some(job) => {
                    if let Err(e) = dispatcher.dispatch(job, ids).await {
                        break LinkOutcome::Lost(e);
                    }
                }
                None => break LinkOutcome::Shutdown,
            },
            result = &mut writer => {
                let error = match result {
                    Ok(Err(e)) => e,
                    _ => LinkError::WriterStopped,
                };
                break LinkOutcome::Lost(error);
            }
        }
    };

    writer.abort();
    let failed = dispatcher.registry.fail_all();
    if failed > 0 {
        tracing::info!(link = %link_id, failed, "Failed pending streams");
    }
    outcome
}

/// Turns jobs into REQUEST frames on one link.
struct Dispatcher {
    link: LinkId,
    sink: FrameSink,
    registry: StreamRegistry,
    read_chunk: usize,
}

impl Dispatcher {
    /// Returns an error only when the link itself is unusable.
    async fn dispatch(&self, job: Job, ids: &mut CorrelationIds) -> Result<()> {
        if job.is_abandoned() {
            tracing::debug!(link = %self.link, job = ?job, "Skipping job abandoned by local client");
            return Ok(());
        }
        match job {
            Job::Http(job) => self.dispatch_http(job, ids).await,
            Job::Connect(job) => self.dispatch_connect(job, ids).await,
        }
    }

    async fn dispatch_http(&self, job: HttpJob, ids: &mut CorrelationIds) -> Result<()> {
        let payload = serialize_request(&job.request);
        let limit = self.sink.max_payload();
        if payload.len() > limit as usize {
            let _ = job.reply.send(Err(GatewayError::RequestTooLarge {
                length: payload.len(),
                limit,
            }));
            return Ok(());
        }

        let id = ids.allocate(&self.registry);
        tracing::debug!(
            link = %self.link,
            correlation_id = id,
            method = %job.request.method(),
            uri = %job.request.uri(),
            "Dispatching request"
        );
        self.registry.insert(id, PendingStream::Http(job.reply));
        self.send_request(id, Frame::request(id, payload)).await
    }

    async fn dispatch_connect(&self, job: ConnectJob, ids: &mut CorrelationIds) -> Result<()> {
        let ConnectJob {
            authority,
            ack,
            socket,
        } = job;

        let id = ids.allocate(&self.registry);
        tracing::debug!(link = %self.link, correlation_id = id, authority = %authority, "Dispatching tunnel");

        let (handle, relay) = tunnel::channel(id);
        self.registry
            .insert(id, PendingStream::Tunnel(TunnelEntry::new(ack, handle)));
        self.send_request(id, Frame::request(id, serialize_connect(&authority)))
            .await?;

        tokio::spawn(run_local_tunnel(
            relay,
            socket,
            self.sink.clone(),
            self.registry.clone(),
            self.read_chunk,
            self.link,
        ));
        Ok(())
    }

    async fn send_request(&self, id: u32, frame: Frame) -> Result<()> {
        if let Err(e) = self.sink.send(frame).await {
            self.registry.fail(id, GatewayError::LinkLost);
            return Err(e);
        }
        Ok(())
    }
}

/// Relay one local CONNECT socket. The socket becomes available only after
/// the local client has been answered.
async fn run_local_tunnel(
    relay: TunnelRelay,
    socket: PendingSocket,
    sink: FrameSink,
    registry: StreamRegistry,
    read_chunk: usize,
    link: LinkId,
) {
    let id = relay.id();
    let state = relay.state();

    let end = match socket.await {
        Ok(socket) => relay.run(socket, &sink, read_chunk).await,
        Err(e) => {
            tracing::debug!(link = %link, correlation_id = id, error = %e, "Local tunnel socket unavailable");
            TunnelEnd::Failed(e)
        }
    };

    if end.is_local() && state.begin_closing() {
        registry.remove_tunnel(id, &state);
        if let Err(e) = sink.send(Frame::tunnel_close(id)).await {
            tracing::debug!(link = %link, correlation_id = id, error = %e, "Could not send TUNNEL_CLOSE");
        }
    }
    state.mark_closed();
}
