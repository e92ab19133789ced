//! Link-level error taxonomy shared by both ends of the relay.
//!
//! Stream-scoped failures (upstream connect, forwarding, gateway errors) live
//! next to the code that produces them; the types here are the ones that can
//! take down a whole physical connection.

use thiserror::Error;

/// A violation of the framing protocol. Always fatal for the connection it
/// was observed on: the decoder never tries to resynchronise.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The type byte does not name a known frame type.
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    /// The declared payload length exceeds the configured limit.
    #[error("frame payload of {length} bytes exceeds limit of {limit} bytes")]
    Oversized { length: u32, limit: u32 },

    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed with {0} bytes of an incomplete frame buffered")]
    Truncated(usize),

    /// An HTTP message carried inside a frame could not be parsed.
    #[error("malformed HTTP message: {0}")]
    MalformedHttp(String),
}

/// Failure of the physical ship <-> offshore link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer closed the link cleanly.
    #[error("link closed by peer")]
    Closed,

    /// The frame writer task is gone; nothing more can be sent on this link.
    #[error("link writer stopped")]
    WriterStopped,

    /// An outbound frame would exceed the payload limit the peer enforces.
    #[error("outbound frame payload of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: u32 },
}

impl LinkError {
    /// Whether this error describes a broken link rather than a single
    /// rejected frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::FrameTooLarge { .. })
    }
}

/// Result alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
