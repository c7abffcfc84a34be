//! Codec module - payload serialization.
//!
//! Framing is payload-agnostic: every frame body is produced by a
//! [`PayloadCodec`] and handed back to one after the disconnect sentinel
//! check. Two codecs ship with the crate:
//!
//! - [`JsonCodec`] - UTF-8 JSON via `serde_json` (the default)
//! - [`RawCodec`] - pass-through for raw bytes
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{JsonCodec, PayloadCodec};
//! use serde_json::json;
//!
//! let codec = JsonCodec::<serde_json::Value>::new();
//! let encoded = codec.encode(&json!({"x": 1})).unwrap();
//! assert_eq!(&encoded[..], br#"{"x":1}"#);
//!
//! let decoded = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, json!({"x": 1}));
//! ```

mod json;
mod raw;

use bytes::Bytes;

use crate::error::Result;

pub use json::JsonCodec;
pub use raw::RawCodec;

/// Converts application values to frame bodies and back.
///
/// Implementations must be cheap to share: a single codec instance is
/// used by every connection of a server or client.
pub trait PayloadCodec: Send + Sync + 'static {
    /// The decoded value handed to `received` handlers.
    type Value: Clone + Send + Sync + 'static;

    /// Encode a value into body bytes.
    fn encode(&self, value: &Self::Value) -> Result<Bytes>;

    /// Decode body bytes into a value.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value>;
}
