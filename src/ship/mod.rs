//! Ship (restricted side) subsystem.
//!
//! # Data Flow
//! ```text
//! local proxy client
//!     → http::server (IngressServer: hyper, CONNECT upgrades)
//!     → job.rs (JobQueue, ordered, unbounded)
//!     → session.rs (UplinkSession: one dispatcher, REQUEST frames)
//!     → link → offshore relay
//!
//! offshore frames
//!     → session.rs (FrameReader)
//!     → registry.rs (StreamRegistry: reply sinks, tunnel handles)
//!     → local client
//! ```
//!
//! # Design Decisions
//! - Exactly one uplink; jobs wait in the queue while it is down
//! - The registry belongs to one physical link and is failed as a whole
//!   when that link is lost

pub mod job;
pub mod registry;
pub mod session;

pub use job::{job_queue, GatewayError, Job, JobQueue, JobReceiver};
pub use registry::{PendingStream, Routed, StreamRegistry};
pub use session::{CorrelationIds, UplinkSession};
