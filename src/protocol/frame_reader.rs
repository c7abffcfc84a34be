//! Two-phase frame decoding against a live stream.
//!
//! TCP has no message boundaries, so each phase accumulates short reads
//! until it owns exactly the bytes it needs:
//! - Header phase: the full fixed-width header, scanned for the terminator
//! - Body phase: exactly the declared number of bytes
//!
//! Each read is bounded by what the current phase still needs, so no bytes
//! belonging to the next phase or the next frame are ever consumed and no
//! leftover buffer is carried between calls.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::protocol::{Framer, FrameReader};
//!
//! let mut reader = FrameReader::new(socket_read_half, Framer::default());
//! while let Some(frame) = reader.read_frame().await? {
//!     println!("Got {} bytes", frame.length());
//! }
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Frame, Framer};
use crate::error::{Result, SockwireError};

/// Scratch size used when discarding an oversized body.
const DISCARD_CHUNK: usize = 8 * 1024;

/// Reads frames from an async byte stream.
///
/// The read methods are not cancel-safe: dropping a read future mid-frame
/// loses the bytes consumed so far. The connection read loop only cancels
/// them while tearing the connection down.
pub struct FrameReader<R> {
    reader: R,
    framer: Framer,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader.
    pub fn new(reader: R, framer: Framer) -> Self {
        Self { reader, framer }
    }

    /// Read one header and return the declared body length.
    ///
    /// Returns `Ok(None)` for an empty length field.
    ///
    /// # Errors
    ///
    /// - `Io(UnexpectedEof)` if the stream ends
    /// - `Protocol` if the length field is malformed
    pub async fn read_header(&mut self) -> Result<Option<usize>> {
        let width = self.framer.header_width();
        let mut header = BytesMut::zeroed(width);
        self.fill(&mut header, "header").await?;
        self.framer.parse_header(&header)
    }

    /// Read exactly `declared_len` body bytes and strip the terminator.
    ///
    /// An oversized body is drained from the stream before the error is
    /// returned so the next header starts at the right offset.
    pub async fn read_body(&mut self, declared_len: usize) -> Result<Frame> {
        let max = self.framer.max_body_size().saturating_add(1);
        if declared_len > max {
            self.discard(declared_len).await?;
            return Err(SockwireError::Protocol(format!(
                "declared body length {} exceeds maximum {}",
                declared_len, max
            )));
        }

        let mut body = BytesMut::zeroed(declared_len);
        self.fill(&mut body, "body").await?;
        self.framer.finish_body(body.freeze())
    }

    /// Read a complete frame.
    ///
    /// Returns `Ok(None)` when the header carried an empty length field;
    /// nothing beyond the header was consumed in that case.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        match self.read_header().await? {
            Some(declared_len) => self.read_body(declared_len).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fill `buf` completely, one bounded read at a time.
    ///
    /// A read error before the first header byte leaves the stream aligned
    /// and is returned as is. Any later error loses consumed bytes, so it is
    /// reported as fatal.
    async fn fill(&mut self, buf: &mut [u8], phase: &str) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = match self.reader.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(e) if filled == 0 && phase == "header" => return Err(e.into()),
                Err(e) => return Err(desync(phase, e)),
            };
            if n == 0 {
                return Err(eof(phase, filled, buf.len()));
            }
            filled += n;
        }
        Ok(())
    }

    /// Read and drop `len` bytes.
    async fn discard(&mut self, len: usize) -> Result<()> {
        let mut scratch = vec![0u8; DISCARD_CHUNK.min(len)];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            let n = self
                .reader
                .read(&mut scratch[..want])
                .await
                .map_err(|e| desync("body", e))?;
            if n == 0 {
                return Err(eof("body", len - remaining, len));
            }
            remaining -= n;
        }
        Ok(())
    }
}

fn eof(phase: &str, got: usize, wanted: usize) -> SockwireError {
    let message = if got == 0 && phase == "header" {
        "peer closed the connection".to_string()
    } else {
        format!("stream ended after {got} of {wanted} {phase} bytes")
    };
    SockwireError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        message,
    ))
}

/// An I/O error that left part of a frame consumed.
///
/// Reported as `InvalidData`, which the read loop treats as fatal whatever
/// the original kind was.
fn desync(phase: &str, e: std::io::Error) -> SockwireError {
    SockwireError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("stream desynchronised mid-{phase}: {e}"),
    ))
}

/// Decode a byte slice that is known to hold whole frames.
///
/// Convenience for tests and tooling; sockets go through [`FrameReader`].
pub fn decode_all(framer: &Framer, mut wire: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    while !wire.is_empty() {
        let width = framer.header_width();
        if wire.len() < width {
            return Err(eof("header", wire.len(), width));
        }
        let (header, rest) = wire.split_at(width);
        wire = rest;

        let Some(declared) = framer.parse_header(header)? else {
            continue;
        };
        if wire.len() < declared {
            return Err(eof("body", wire.len(), declared));
        }
        let (body, rest) = wire.split_at(declared);
        wire = rest;
        frames.push(framer.finish_body(Bytes::copy_from_slice(body))?);
    }
    Ok(frames)
}
