//! Wire format encoding and decoding.
//!
//! Every frame is a fixed-width ASCII header followed by a terminated body:
//! ```text
//! ┌──────────────────────────────────┬───────────────────────┐
//! │ Header (header_width bytes)      │ Body (declared bytes) │
//! │ "<len>" + terminator + ' ' fill  │ payload + terminator  │
//! └──────────────────────────────────┴───────────────────────┘
//! ```
//!
//! `<len>` is the decimal byte length of the body *including* its trailing
//! terminator. With the defaults (`|`, 64 bytes) the payload `{"x":1}`
//! travels as `8|` padded with 62 spaces, then `{"x":1}|`.
//!
//! The terminator is never escaped. The encoder refuses payloads that
//! contain it, and the decoder is driven by the declared length rather
//! than by scanning, so a stray terminator cannot shift frame boundaries.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{Frame, OutboundFrame};
use crate::error::{Result, SockwireError};

/// Default header width in bytes.
pub const DEFAULT_HEADER_WIDTH: usize = 64;

/// Default terminator byte.
pub const DEFAULT_TERMINATOR: u8 = b'|';

/// Default maximum body size (16 MB), terminator excluded.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Reserved body signalling an intentional disconnect.
pub const DISCONNECT_SENTINEL: &[u8] = b"!DISCONNECT";

/// Fill byte padding the header to its fixed width.
pub const HEADER_FILL: u8 = b' ';

/// Framing parameters shared by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Byte ending the length field and the body.
    pub terminator: u8,
    /// Fixed header width in bytes.
    pub header_width: usize,
    /// Largest accepted body, terminator excluded.
    pub max_body_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            header_width: DEFAULT_HEADER_WIDTH,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl FrameConfig {
    /// Set the terminator from a string that must be exactly one byte long.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `terminator` is not a single byte.
    pub fn with_terminator(mut self, terminator: &str) -> Result<Self> {
        match terminator.as_bytes() {
            [byte] => {
                self.terminator = *byte;
                Ok(self)
            }
            _ => Err(SockwireError::Config(format!(
                "terminator must be exactly one byte, got {:?} ({} bytes)",
                terminator,
                terminator.len()
            ))),
        }
    }

    /// Set the terminator byte.
    #[must_use]
    pub fn with_terminator_byte(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    /// Set the header width.
    #[must_use]
    pub fn with_header_width(mut self, header_width: usize) -> Self {
        self.header_width = header_width;
        self
    }

    /// Set the maximum body size.
    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Check the configuration for values the wire format cannot carry.
    pub fn validate(&self) -> Result<()> {
        if self.terminator.is_ascii_digit() {
            return Err(SockwireError::Config(format!(
                "terminator {:?} collides with the decimal length field",
                self.terminator as char
            )));
        }

        if self.terminator == HEADER_FILL {
            return Err(SockwireError::Config(
                "terminator collides with the header fill byte".to_string(),
            ));
        }

        // Smallest header: one digit plus the terminator.
        if self.header_width < 2 {
            return Err(SockwireError::Config(format!(
                "header width {} is too small",
                self.header_width
            )));
        }

        if self.max_body_size == 0 {
            return Err(SockwireError::Config(
                "max body size must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Pure encoder/decoder for the fixed-width framing.
///
/// Holds no stream state; [`FrameReader`](super::FrameReader) drives it
/// against a live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    config: FrameConfig,
}

impl Framer {
    /// Create a framer, validating the configuration.
    pub fn new(config: FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Get the framing configuration.
    #[inline]
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Get the terminator byte.
    #[inline]
    pub fn terminator(&self) -> u8 {
        self.config.terminator
    }

    /// Get the header width.
    #[inline]
    pub fn header_width(&self) -> usize {
        self.config.header_width
    }

    /// Get the maximum body size.
    #[inline]
    pub fn max_body_size(&self) -> usize {
        self.config.max_body_size
    }

    /// Encode the fixed-width header for a declared body length.
    ///
    /// # Errors
    ///
    /// Returns `HeaderOverflow` if the decimal length plus terminator does
    /// not fit in the header.
    pub fn encode_header(&self, declared_len: usize) -> Result<Bytes> {
        let digits = declared_len.to_string();
        let needed = digits.len() + 1;
        let width = self.config.header_width;

        if needed > width {
            return Err(SockwireError::HeaderOverflow { needed, width });
        }

        let mut header = BytesMut::with_capacity(width);
        header.put_slice(digits.as_bytes());
        header.put_u8(self.config.terminator);
        header.put_bytes(HEADER_FILL, width - needed);
        Ok(header.freeze())
    }

    /// Encode a body into an outbound frame.
    ///
    /// # Errors
    ///
    /// - `TerminatorInPayload` if the body contains the terminator byte
    /// - `HeaderOverflow` if the length does not fit in the header
    pub fn encode(&self, body: Bytes) -> Result<OutboundFrame> {
        if body.contains(&self.config.terminator) {
            return Err(SockwireError::TerminatorInPayload {
                terminator: self.config.terminator,
            });
        }

        let header = self.encode_header(body.len() + 1)?;
        Ok(OutboundFrame::new(header, body, self.config.terminator))
    }

    /// Encode the disconnect sentinel frame.
    pub fn encode_sentinel(&self) -> Result<OutboundFrame> {
        self.encode(Bytes::from_static(DISCONNECT_SENTINEL))
    }

    /// Parse a complete header into the declared body length.
    ///
    /// Returns `Ok(None)` when the length field is empty, which callers
    /// treat as a non-event rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the header has no terminator, the length text
    /// is not an unsigned decimal, or the declared length is zero.
    pub fn parse_header(&self, header: &[u8]) -> Result<Option<usize>> {
        let end = header
            .iter()
            .position(|&b| b == self.config.terminator)
            .ok_or_else(|| {
                SockwireError::Protocol(format!(
                    "no terminator within {}-byte header",
                    header.len()
                ))
            })?;

        let text = header[..end].trim_ascii();
        if text.is_empty() {
            return Ok(None);
        }

        if !text.iter().all(u8::is_ascii_digit) {
            return Err(invalid_length(text));
        }

        let declared = std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| invalid_length(text))?;

        if declared == 0 {
            return Err(SockwireError::Protocol(
                "declared length 0 leaves no room for the terminator".to_string(),
            ));
        }

        Ok(Some(declared))
    }

    /// Strip the trailing terminator from a complete body.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the body does not end with the terminator.
    pub fn finish_body(&self, body: Bytes) -> Result<Frame> {
        match body.last() {
            Some(&last) if last == self.config.terminator => {
                Ok(Frame::new(body.slice(..body.len() - 1)))
            }
            _ => Err(SockwireError::Protocol(format!(
                "{}-byte body is not terminated",
                body.len()
            ))),
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self {
            config: FrameConfig::default(),
        }
    }
}

fn invalid_length(text: &[u8]) -> SockwireError {
    SockwireError::Protocol(format!(
        "invalid length field {:?}",
        String::from_utf8_lossy(text)
    ))
}
