//! CONNECT tunnel relaying, identical on both ends of the link.
//!
//! # Data Flow
//! ```text
//! socket read  → relay.rs → TUNNEL_DATA frame → FrameSink
//! TUNNEL_DATA  → TunnelHandle::deliver → relay.rs → socket write
//! TUNNEL_CLOSE → TunnelHandle::close   → relay.rs → socket shutdown
//! ```
//!
//! # Design Decisions
//! - Each tunnel is a task plus a handle, advanced only by messages
//! - Close decisions go through the state machine in state.rs, so a tunnel
//!   is torn down once no matter how many triggers race

pub mod relay;
pub mod state;

pub use relay::{channel, TunnelCommand, TunnelEnd, TunnelHandle, TunnelRelay};
pub use state::{TunnelPhase, TunnelState};
