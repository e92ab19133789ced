//! Frame type and encoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the fixed frame header: length(4) + type(1) + correlation id(4).
pub const HEADER_LEN: usize = 9;

/// Acknowledgement payload sent back for an established CONNECT tunnel.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Frame types carried on the link.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Raw HTTP/1.x request (or CONNECT request line) from the ship.
    Request = 0,
    /// Raw HTTP/1.x response, or the tunnel acknowledgement.
    Response = 1,
    /// Opaque tunnel bytes, either direction.
    TunnelData = 2,
    /// Reserved. Decoded but never emitted.
    TunnelOpen = 3,
    /// End of a tunnel, either direction.
    TunnelClose = 4,
    /// Human-readable diagnostic for a failed stream.
    Error = 5,
}

impl FrameType {
    /// Stable lowercase name, used as a log field and metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Request => "request",
            FrameType::Response => "response",
            FrameType::TunnelData => "tunnel_data",
            FrameType::TunnelOpen => "tunnel_open",
            FrameType::TunnelClose => "tunnel_close",
            FrameType::Error => "error",
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(FrameType::Request),
            1 => Ok(FrameType::Response),
            2 => Ok(FrameType::TunnelData),
            3 => Ok(FrameType::TunnelOpen),
            4 => Ok(FrameType::TunnelClose),
            5 => Ok(FrameType::Error),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One length-prefixed, typed, correlation-tagged message.
///
/// The length field is never stored; it is always the payload's size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    pub correlation_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameType, correlation_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            correlation_id,
            payload: payload.into(),
        }
    }

    pub fn request(correlation_id: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Request, correlation_id, payload)
    }

    pub fn response(correlation_id: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Response, correlation_id, payload)
    }

    pub fn tunnel_data(correlation_id: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameType::TunnelData, correlation_id, payload)
    }

    pub fn tunnel_close(correlation_id: u32) -> Self {
        Self::new(FrameType::TunnelClose, correlation_id, Bytes::new())
    }

    /// ERROR frame with a UTF-8 diagnostic.
    pub fn error(correlation_id: u32, message: impl std::fmt::Display) -> Self {
        Self::new(FrameType::Error, correlation_id, message.to_string())
    }

    /// Payload length as written in the header.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// Callers are expected to have checked the payload against the link's
    /// size limit; the length is truncated to `u32` otherwise.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32(self.payload.len() as u32);
        dst.put_u8(self.kind as u8);
        dst.put_u32(self.correlation_id);
        dst.extend_from_slice(&self.payload);
    }

    /// Wire encoding as a standalone buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Payload interpreted as a diagnostic string (lossy).
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian() {
        let frame = Frame::new(FrameType::TunnelClose, 0x0102_0304, Bytes::from_static(b"xy"));
        let wire = frame.to_bytes();
        assert_eq!(&wire[..], &[0, 0, 0, 2, 4, 1, 2, 3, 4, b'x', b'y']);
    }

    #[test]
    fn type_bytes_match_protocol_table() {
        for (byte, kind) in [
            (0u8, FrameType::Request),
            (1, FrameType::Response),
            (2, FrameType::TunnelData),
            (3, FrameType::TunnelOpen),
            (4, FrameType::TunnelClose),
            (5, FrameType::Error),
        ] {
            assert_eq!(FrameType::try_from(byte).unwrap(), kind);
            assert_eq!(kind as u8, byte);
        }
        assert!(matches!(
            FrameType::try_from(6),
            Err(ProtocolError::UnknownFrameType(6))
        ));
    }

    #[test]
    fn error_frame_carries_text() {
        let frame = Frame::error(9, "Connect error: refused");
        assert_eq!(frame.kind, FrameType::Error);
        assert_eq!(frame.payload_text(), "Connect error: refused");
    }
}
