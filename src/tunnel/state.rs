//! Tunnel lifecycle state machine.
//!
//! # State Transitions
//! ```text
//! OPEN → CLOSING: first close trigger (socket EOF/error, TUNNEL_CLOSE, link loss)
//! CLOSING → CLOSED: relay task released the socket
//! ```
//!
//! Only the caller that wins OPEN → CLOSING acts on the close (removes the
//! map entry, emits a frame, signals the relay). Every later trigger is a
//! no-op, which is what keeps tunnel teardown idempotent.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    /// Both ends live; bytes may flow in either direction.
    Open = 0,
    /// One side has signalled end-of-stream or an error.
    Closing = 1,
    /// The socket and the registry entry are released.
    Closed = 2,
}

impl From<u8> for TunnelPhase {
    fn from(val: u8) -> Self {
        match val {
            0 => TunnelPhase::Open,
            1 => TunnelPhase::Closing,
            _ => TunnelPhase::Closed,
        }
    }
}

/// Shared, lock-free tunnel phase.
#[derive(Debug)]
pub struct TunnelState {
    phase: AtomicU8,
}

impl TunnelState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(TunnelPhase::Open as u8),
        }
    }

    pub fn phase(&self) -> TunnelPhase {
        TunnelPhase::from(self.phase.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.phase() == TunnelPhase::Open
    }

    /// Attempt OPEN → CLOSING. Returns `true` for exactly one caller.
    pub fn begin_closing(&self) -> bool {
        self.phase
            .compare_exchange(
                TunnelPhase::Open as u8,
                TunnelPhase::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to CLOSED from any phase. Returns `true` if it was not already
    /// closed.
    pub fn mark_closed(&self) -> bool {
        self.phase.swap(TunnelPhase::Closed as u8, Ordering::AcqRel) != TunnelPhase::Closed as u8
    }
}

impl Default for TunnelState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn only_first_close_wins() {
        let state = TunnelState::new();
        assert!(state.is_open());
        assert!(state.begin_closing());
        assert!(!state.begin_closing());
        assert_eq!(state.phase(), TunnelPhase::Closing);

        assert!(state.mark_closed());
        assert!(!state.mark_closed());
        assert!(!state.begin_closing());
        assert_eq!(state.phase(), TunnelPhase::Closed);
    }

    #[test]
    fn concurrent_close_has_single_winner() {
        let state = Arc::new(TunnelState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.begin_closing())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
