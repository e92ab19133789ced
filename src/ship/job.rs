//! Jobs handed from the ingress listener to the uplink session.
//!
//! The queue is unbounded and ordered. While the uplink is down, jobs simply
//! wait in it; the ingress side only ever awaits the job's own reply.

use std::io;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use hyper::{Request, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::error::ProtocolError;

/// Raw byte stream of a local CONNECT client.
pub trait LocalStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LocalStream for T {}

pub type LocalSocket = Box<dyn LocalStream>;

/// Resolves to the local socket once the client has seen the acknowledgement.
pub type PendingSocket = BoxFuture<'static, io::Result<LocalSocket>>;

/// Why a job could not be completed. Rendered locally as 502.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The offshore relay answered with an ERROR frame.
    #[error("{0}")]
    Offshore(String),

    #[error("connection to offshore relay lost")]
    LinkLost,

    #[error("uplink session stopped")]
    Stopped,

    #[error("request of {length} bytes exceeds the link frame limit of {limit} bytes")]
    RequestTooLarge { length: usize, limit: u32 },

    #[error("invalid response from offshore relay: {0}")]
    MalformedResponse(#[from] ProtocolError),
}

/// Raw RESPONSE payload for an HTTP job.
pub type HttpReply = Result<Bytes, GatewayError>;

/// Status carried by a tunnel acknowledgement.
pub type ConnectReply = Result<StatusCode, GatewayError>;

/// A plain HTTP request, fully buffered.
pub struct HttpJob {
    pub request: Request<Bytes>,
    pub reply: oneshot::Sender<HttpReply>,
}

/// A CONNECT request waiting for its tunnel.
pub struct ConnectJob {
    /// `host:port` to open on the offshore side.
    pub authority: String,
    pub ack: oneshot::Sender<ConnectReply>,
    pub socket: PendingSocket,
}

pub enum Job {
    Http(HttpJob),
    Connect(ConnectJob),
}

impl Job {
    /// Whether the local caller has gone away.
    pub fn is_abandoned(&self) -> bool {
        match self {
            Job::Http(job) => job.reply.is_closed(),
            Job::Connect(job) => job.ack.is_closed(),
        }
    }

    /// Resolve the job with `error` without dispatching it.
    pub fn fail(self, error: GatewayError) {
        match self {
            Job::Http(job) => {
                let _ = job.reply.send(Err(error));
            }
            Job::Connect(job) => {
                let _ = job.ack.send(Err(error));
            }
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Http(job) => write!(f, "Http({} {})", job.request.method(), job.request.uri()),
            Job::Connect(job) => write!(f, "Connect({})", job.authority),
        }
    }
}

/// Producer side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

/// Consumer side of the job queue, owned by the uplink session.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Job>,
}

pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    /// Append a job. Fails the job immediately if the session is gone.
    pub fn submit(&self, job: Job) {
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            job.fail(GatewayError::Stopped);
        }
    }

    /// Submit a buffered request and wait for its raw response.
    pub async fn http(&self, request: Request<Bytes>) -> HttpReply {
        let (reply, rx) = oneshot::channel();
        self.submit(Job::Http(HttpJob { request, reply }));
        rx.await.unwrap_or(Err(GatewayError::Stopped))
    }

    /// Submit a CONNECT and wait for the acknowledgement.
    pub async fn connect(&self, authority: String, socket: PendingSocket) -> ConnectReply {
        let (ack, rx) = oneshot::channel();
        self.submit(Job::Connect(ConnectJob {
            authority,
            ack,
            socket,
        }));
        rx.await.unwrap_or(Err(GatewayError::Stopped))
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Refuse new jobs and fail every job still queued.
    pub fn close(&mut self, error: impl Fn() -> GatewayError) {
        self.rx.close();
        while let Ok(job) = self.rx.try_recv() {
            job.fail(error());
        }
    }
}
