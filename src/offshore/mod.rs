//! Offshore (egress side) subsystem.
//!
//! # Data Flow
//! ```text
//! ship link
//!     → server.rs (accept, one task per ship)
//!     → link::FrameReader
//!     → router.rs (DownlinkRouter)
//!         REQUEST CONNECT → upstream TCP + tunnel relay
//!         REQUEST other   → forwarder.rs (hyper-util client) → RESPONSE
//!         TUNNEL_DATA / TUNNEL_CLOSE → tunnel handle
//!     → link::FrameSink → ship
//! ```
//!
//! # Design Decisions
//! - Ship connections share nothing but the pooled upstream client
//! - Protocol violations end only the offending ship connection

pub mod forwarder;
pub mod router;
pub mod server;

pub use forwarder::{ForwardError, HttpForwarder};
pub use router::{DownlinkRouter, RouterError};
pub use server::OffshoreServer;
