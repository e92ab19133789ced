//! Physical link plumbing shared by the ship and the offshore relay.
//!
//! # Data Flow
//! ```text
//! many producers (dispatcher, tunnel relays, stream tasks)
//!     → FrameSink (bounded mpsc, whole frames only)
//!     → writer task (encode + write_all, send order preserved)
//!     → socket
//!
//! socket
//!     → FrameReader (FrameBuffer, cancel-safe next_frame)
//!     → connection owner (session / router)
//! ```
//!
//! # Design Decisions
//! - A single writer task per link means frames never interleave on the wire
//! - The writer queue is bounded: a slow link pauses the producers
//! - Reading is cancel-safe so it can sit in a `select!` next to job dispatch

pub mod reader;
pub mod sink;

pub use reader::FrameReader;
pub use sink::{spawn_writer, FrameSink};
