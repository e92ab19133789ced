//! Link identity and status tracking.
//!
//! # Responsibilities
//! - Generate unique link IDs for tracing
//! - Publish the ship uplink state (Connecting → Connected → Backoff)
//! - Let callers wait for a live link

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Global atomic counter for link IDs.
/// Relaxed ordering is sufficient since we only need uniqueness.
static LINK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one physical ship <-> offshore connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// Generate a new unique link ID.
    pub fn new() -> Self {
        Self(LINK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// State of the ship's uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Dialing the offshore relay.
    Connecting,
    /// Link is up; jobs are being dispatched.
    Connected(LinkId),
    /// Waiting before the next connection attempt.
    Backoff,
    /// The session has shut down.
    Stopped,
}

/// Publisher side of the link state.
#[derive(Debug)]
pub struct LinkStateTx(watch::Sender<LinkState>);

/// Read-only view of the link state.
#[derive(Debug, Clone)]
pub struct LinkStatus(watch::Receiver<LinkState>);

/// Create a publisher/observer pair starting in `Connecting`.
pub fn link_status() -> (LinkStateTx, LinkStatus) {
    let (tx, rx) = watch::channel(LinkState::Connecting);
    (LinkStateTx(tx), LinkStatus(rx))
}

impl LinkStateTx {
    pub fn set(&self, state: LinkState) {
        self.0.send_replace(state);
    }

    pub fn subscribe(&self) -> LinkStatus {
        LinkStatus(self.0.subscribe())
    }
}

impl LinkStatus {
    /// Current state.
    pub fn current(&self) -> LinkState {
        *self.0.borrow()
    }

    /// Wait until a link is up and return its ID.
    ///
    /// Returns `None` if the session stops first.
    pub async fn wait_connected(&mut self) -> Option<LinkId> {
        self.wait_for(|state| matches!(state, LinkState::Connected(_) | LinkState::Stopped))
            .await
            .and_then(|state| match state {
                LinkState::Connected(id) => Some(id),
                _ => None,
            })
    }

    /// Wait until a link other than `previous` is up.
    pub async fn wait_reconnected(&mut self, previous: LinkId) -> Option<LinkId> {
        self.wait_for(|state| match state {
            LinkState::Connected(id) => *id != previous,
            LinkState::Stopped => true,
            _ => false,
        })
        .await
        .and_then(|state| match state {
            LinkState::Connected(id) => Some(id),
            _ => None,
        })
    }

    async fn wait_for<F>(&mut self, predicate: F) -> Option<LinkState>
    where
        F: FnMut(&LinkState) -> bool,
    {
        self.0.wait_for(predicate).await.ok().map(|state| *state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_id_unique() {
        let id1 = LinkId::new();
        let id2 = LinkId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("link-"));
    }

    #[tokio::test]
    async fn wait_connected_sees_later_transition() {
        let (tx, mut status) = link_status();
        assert_eq!(status.current(), LinkState::Connecting);

        let id = LinkId::new();
        let waiter = tokio::spawn(async move { status.wait_connected().await });
        tx.set(LinkState::Backoff);
        tx.set(LinkState::Connected(id));

        assert_eq!(waiter.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn stopped_session_ends_the_wait() {
        let (tx, mut status) = link_status();
        tx.set(LinkState::Stopped);
        assert_eq!(status.wait_connected().await, None);
    }

    #[tokio::test]
    async fn wait_reconnected_skips_previous_link() {
        let (tx, mut status) = link_status();
        let first = LinkId::new();
        tx.set(LinkState::Connected(first));

        let mut observer = status.clone();
        let waiter = tokio::spawn(async move { observer.wait_reconnected(first).await });
        let second = LinkId::new();
        tx.set(LinkState::Backoff);
        tx.set(LinkState::Connected(second));

        assert_eq!(waiter.await.unwrap(), Some(second));
        assert_eq!(status.wait_connected().await, Some(second));
    }
}
