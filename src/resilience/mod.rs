//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Uplink connection lost or refused:
//!     → backoff.rs (fixed delay + optional jitter)
//!     → reconnect, forever, until shutdown
//! ```
//!
//! # Design Decisions
//! - Retry the link, never individual requests: pending streams fail fast
//! - Upstream deadlines live with the forwarder (connect/request timeouts)

pub mod backoff;
