//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → Bind listener → Spawn role tasks → Handle
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop uplink → Fail queued jobs → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then listeners, then tasks
//! - Shutdown has timeout: forced exit after deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start_offshore, start_ship, OffshoreHandle, ShipHandle, StartupError};
