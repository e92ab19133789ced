//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (local proxy client or ship link)
//!     → listener.rs (accept loop, connection limits)
//!     → Hand off to the ingress server or the downlink router
//!
//! Ship uplink states (connection.rs):
//!     Connecting → Connected(link id) → Backoff → Connecting → ...
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Every physical link gets a unique ID for log correlation
//! - Uplink state is published on a watch channel, never polled

pub mod connection;
pub mod listener;

pub use connection::{link_status, LinkId, LinkState, LinkStateTx, LinkStatus};
pub use listener::{Accepted, ConnectionPermit, Listener, ListenerError};
