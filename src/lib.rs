//! Multiplexed HTTP/CONNECT relay over a single ship <-> offshore link.

// Wire protocol
pub mod error;
pub mod link;
pub mod protocol;
pub mod tunnel;

// Roles
pub mod http;
pub mod offshore;
pub mod ship;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::schema::RelayConfig;
pub use lifecycle::Shutdown;
pub use protocol::{Frame, FrameType};
