//! JSON codec using `serde_json`.
//!
//! Payloads travel as compact UTF-8 JSON text. The value type defaults to
//! [`serde_json::Value`] so untyped maps work out of the box, but any
//! `Serialize + DeserializeOwned` type can be used instead.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::{JsonCodec, PayloadCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
//! struct Position {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let codec = JsonCodec::<Position>::new();
//! let encoded = codec.encode(&Position { x: 500, y: 30 }).unwrap();
//! let decoded = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, Position { x: 500, y: 30 });
//! ```

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PayloadCodec;
use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec<T = serde_json::Value> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a new JSON codec.
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> PayloadCodec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Value = T;

    #[inline]
    fn encode(&self, value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    #[inline]
    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
