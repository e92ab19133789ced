//! Multiplexing wire protocol.
//!
//! # Wire Format
//! ```text
//! ┌────────────┬────────┬────────────────┬─────────────────┐
//! │ Length     │ Type   │ Correlation ID │ Payload         │
//! │ 4 bytes BE │ 1 byte │ 4 bytes BE     │ `Length` bytes  │
//! └────────────┴────────┴────────────────┴─────────────────┘
//! ```
//!
//! # Data Flow
//! ```text
//! socket read (arbitrary chunk)
//!     → codec.rs (FrameBuffer: append chunk, take complete frames)
//!     → frame.rs (typed Frame)
//!     → ship session / offshore router
//!
//! Frame::encode → link writer → socket write
//! ```
//!
//! # Design Decisions
//! - The codec knows nothing about HTTP; payloads are opaque bytes
//! - Payload size is bounded; violations are connection-fatal
//! - Unknown type bytes are rejected rather than skipped

pub mod codec;
pub mod frame;

pub use codec::{FrameBuffer, DEFAULT_MAX_PAYLOAD};
pub use frame::{Frame, FrameType, CONNECTION_ESTABLISHED, HEADER_LEN};
