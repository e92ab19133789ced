//! Shutdown coordination for both relay roles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that the accept loops and the uplink
/// session subscribe to. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_a_single_trigger() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert!(!shutdown.is_triggered());

        shutdown.clone().trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
    }
}
