//! Inbound and outbound frame types.
//!
//! Uses `bytes::Bytes` so bodies are shared rather than copied between
//! the codec, the framer and the writer task.
//!
//! # Example
//!
//! ```
//! use sockwire::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Bytes::from_static(b"hello"));
//! assert_eq!(frame.length(), 5);
//! assert!(!frame.is_disconnect());
//! ```

use bytes::Bytes;

use super::wire_format::DISCONNECT_SENTINEL;

/// A decoded frame with its terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    length: usize,
    body: Bytes,
}

impl Frame {
    /// Create a frame from a body.
    pub fn new(body: Bytes) -> Self {
        Self {
            length: body.len(),
            body,
        }
    }

    /// Body length in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Check if this frame is the disconnect sentinel.
    #[inline]
    pub fn is_disconnect(&self) -> bool {
        self.body.as_ref() == DISCONNECT_SENTINEL
    }
}

/// A frame ready to be written to a socket.
///
/// Kept as three parts so the writer can hand them to `write_vectored`
/// without concatenating.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Fixed-width header.
    pub header: Bytes,
    /// Payload bytes.
    pub body: Bytes,
    /// Trailing terminator.
    pub trailer: [u8; 1],
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: Bytes, body: Bytes, terminator: u8) -> Self {
        Self {
            header,
            body,
            trailer: [terminator],
        }
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        self.header.len() + self.body.len() + self.trailer.len()
    }

    /// The wire parts in write order.
    #[inline]
    pub fn parts(&self) -> [&[u8]; 3] {
        [&self.header, &self.body, &self.trailer]
    }

    /// Copy the frame into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        for part in self.parts() {
            buf.extend_from_slice(part);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(Bytes::from_static(b"hello"));
        assert_eq!(frame.length(), 5);
        assert_eq!(frame.body(), b"hello");
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(Frame::new(Bytes::from_static(b"!DISCONNECT")).is_disconnect());
        assert!(!Frame::new(Bytes::from_static(b"\"!DISCONNECT\"")).is_disconnect());
        assert!(!Frame::new(Bytes::from_static(b"!DISCONNECT ")).is_disconnect());
        assert!(!Frame::new(Bytes::new()).is_disconnect());
    }

    #[test]
    fn test_outbound_frame_size() {
        let frame = OutboundFrame::new(
            Bytes::from_static(b"6|  "),
            Bytes::from_static(b"hello"),
            b'|',
        );

        assert_eq!(frame.size(), 4 + 5 + 1);
        assert_eq!(frame.to_vec(), b"6|  hello|");
    }

    #[test]
    fn test_outbound_frame_parts_order() {
        let frame = OutboundFrame::new(Bytes::from_static(b"H"), Bytes::from_static(b"B"), b'T');
        let parts = frame.parts();
        assert_eq!(parts[0], b"H");
        assert_eq!(parts[1], b"B");
        assert_eq!(parts[2], b"T");
    }
}
