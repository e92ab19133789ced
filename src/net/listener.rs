//! Bounded TCP accept shared by both relay roles.
//!
//! The ship's proxy ingress and the offshore's ship-link endpoint each own a
//! `Listener`. Every accepted socket occupies one connection slot until its
//! `ConnectionPermit` is dropped. At the limit, `accept` leaves further
//! sockets in the kernel backlog instead of refusing them.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(io::Error),

    /// The slot semaphore was closed; nothing more can be admitted.
    #[error("connection limit closed")]
    Closed,
}

impl ListenerError {
    /// Accept errors concern one socket; the listener stays usable.
    pub fn is_transient(&self) -> bool {
        matches!(self, ListenerError::Accept(_))
    }
}

/// One admitted connection.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: ConnectionPermit,
}

/// Connection slot held for the lifetime of one accepted socket.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}

/// TCP listener admitting at most `max_connections` live sockets.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    slots: Arc<Semaphore>,
    max_connections: usize,
    label: &'static str,
}

impl Listener {
    /// Bind `address` ("ip:port"). `label` names the listener in logs.
    pub async fn bind(label: &'static str, address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: address.to_string(),
            source,
        };
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| bind_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let inner = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(listener = label, address = %local_addr, max_connections, "Listener bound");
        Ok(Self {
            inner,
            local_addr,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            label,
        })
    }

    /// Wait for a free slot, then for the next socket.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(listener = self.label, peer_addr = %peer, error = %e, "TCP_NODELAY not set");
        }

        tracing::debug!(
            listener = self.label,
            peer_addr = %peer,
            free_slots = self.slots.available_permits(),
            "Accepted"
        );
        Ok(Accepted {
            stream,
            peer,
            permit: ConnectionPermit { _slot: slot },
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn slots_are_returned_on_drop() {
        let listener = Listener::bind("test", "127.0.0.1:0", 2).await.unwrap();
        let _client = TcpStream::connect(listener.local_addr()).await.unwrap();

        let accepted = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);
        assert!(accepted.stream.nodelay().unwrap());

        drop(accepted);
        assert_eq!(listener.available_permits(), 2);
        assert_eq!(listener.max_connections(), 2);
    }

    #[tokio::test]
    async fn full_listener_waits_for_a_slot() {
        let listener = Listener::bind("test", "127.0.0.1:0", 1).await.unwrap();
        let _first = TcpStream::connect(listener.local_addr()).await.unwrap();
        let _second = TcpStream::connect(listener.local_addr()).await.unwrap();

        let held = listener.accept().await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(100), listener.accept()).await.is_err());

        drop(held);
        let next = tokio::time::timeout(Duration::from_secs(5), listener.accept()).await.unwrap();
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn bind_rejects_unparseable_address() {
        let err = Listener::bind("test", "localhost", 1).await.err().unwrap();
        assert!(matches!(err, ListenerError::Bind { ref address, .. } if address == "localhost"));
        assert!(!err.is_transient());
    }
}
