//! Raw codec - pass-through for binary data.
//!
//! Used when the application already owns its serialization. Encoding
//! shares the caller's buffer.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{PayloadCodec, RawCodec};
//! use bytes::Bytes;
//!
//! let bytes = Bytes::from_static(b"zero copy");
//! let encoded = RawCodec.encode(&bytes).unwrap();
//! assert_eq!(encoded.as_ptr(), bytes.as_ptr()); // Same memory
//! ```

use bytes::Bytes;

use super::PayloadCodec;
use crate::error::Result;

/// Raw codec that passes bytes through without transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl PayloadCodec for RawCodec {
    type Value = Bytes;

    /// Cheap clone of the input.
    #[inline]
    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    /// Copies the body; decoding never fails.
    #[inline]
    fn decode(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}
