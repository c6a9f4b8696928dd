//! # simbus-codec
//!
//! Guarded serialization for the simbus RPC fabric.
//!
//! The fabric moves every argument and reply through an opaque binary frame.
//! This crate provides the encoder/decoder pair behind those frames plus a
//! diagnostic layer that catches the two payload mistakes that otherwise
//! surface as silent corruption far away from their cause:
//!
//! | Check | When | Symptom it prevents |
//! |-------|------|---------------------|
//! | Wire-field case | encode + decode | a field serialized under a lower-case name never matches the peer's decoder |
//! | Non-default decode target | decode | stale values surviving a decode into an already-populated variable |
//!
//! Both checks are diagnostics only: they warn through [`tracing`] and keep
//! going. The underlying codec still produces whatever it produces; the
//! point is that the warning names the offending field instead of leaving a
//! mysteriously wrong computation three layers up.
//!
//! ## Example
//!
//! ```rust
//! use simbus_codec::{GuardedCodec, JsonCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
//! #[serde(rename_all = "PascalCase")]
//! struct Vote {
//!     term: u64,
//!     granted: bool,
//! }
//!
//! let codec = GuardedCodec::<JsonCodec>::default();
//! let bytes = codec.encode(&Vote { term: 7, granted: true }).unwrap();
//!
//! let mut out = Vote::default();
//! codec.decode_into(&bytes, &mut out).unwrap();
//! assert_eq!(out.term, 7);
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

use serde::Serialize;
use serde::de::DeserializeOwned;

mod guard;
mod registry;

pub use guard::{check_default, check_value, diagnostic_count};
pub use registry::{Tagged, register, register_by_name, short_type_name};

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable message serialization format.
///
/// The fabric is generic over this trait; [`JsonCodec`] is the default.
/// Frames never leave the process, so no cross-version compatibility is
/// promised: both ends always run the same codec instance type.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Self-describing and human-readable, which is exactly what you want when a
/// test prints a frame it did not expect.
#[derive(Clone, Copy, Default, Debug)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

/// A codec wrapped with the payload-shape guard.
///
/// Every encode runs the wire-field-case check on the value; every
/// [`decode_into`](Self::decode_into) additionally runs the
/// non-default-target check on the destination. The checks are memoized
/// process-wide, so steady-state traffic pays nothing.
#[derive(Clone, Copy, Default, Debug)]
pub struct GuardedCodec<C: MessageCodec = JsonCodec> {
    inner: C,
}

impl GuardedCodec {
    /// Guarded codec over the default JSON format.
    pub fn json() -> Self {
        GuardedCodec { inner: JsonCodec }
    }
}

impl<C: MessageCodec> GuardedCodec<C> {
    /// Wrap an existing codec with the guard.
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Encode a value, checking its wire shape first.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if the underlying codec fails.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        guard::check_value(value);
        self.inner.encode(value)
    }

    /// Decode a fresh value from `buf`.
    ///
    /// The decoded value's wire shape is checked after decoding, so a
    /// mis-cased payload type is diagnosed on either side of the wire.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the underlying codec fails.
    pub fn decode<T: Serialize + DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        let value = self.inner.decode::<T>(buf)?;
        guard::check_value(&value);
        Ok(value)
    }

    /// Decode `buf` into an existing destination, overwriting it.
    ///
    /// Runs both guard checks against the destination before decoding: the
    /// wire-field-case check, and the non-default-target check that warns
    /// when `dest` still carries values from a previous life.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the underlying codec fails; `dest` is
    /// left untouched in that case.
    pub fn decode_into<T: Serialize + DeserializeOwned>(
        &self,
        buf: &[u8],
        dest: &mut T,
    ) -> Result<(), CodecError> {
        guard::check_value(dest);
        guard::check_default(dest);
        *dest = self.inner.decode(buf)?;
        Ok(())
    }
}

/// Clear all process-wide guard and registry state.
///
/// The memoized visited-type set, the diagnostic counter and the tagged-type
/// registry are process globals so that each offending type is reported
/// exactly once per process. A library embedding that runs independent
/// simulations back to back calls this between them.
pub fn reset() {
    guard::reset();
    registry::reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq, Default)]
    #[serde(rename_all = "PascalCase")]
    struct Entry {
        term: u64,
        command: String,
    }

    #[test]
    fn json_codec_roundtrip() {
        let codec = JsonCodec;
        let entry = Entry {
            term: 3,
            command: "put x 1".to_string(),
        };

        let bytes = codec.encode(&entry).expect("encode should succeed");
        let decoded: Entry = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn json_codec_primitives_and_containers() {
        let codec = JsonCodec;

        let n = 9099i64;
        let bytes = codec.encode(&n).expect("encode should succeed");
        let decoded: i64 = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, n);

        let entries = vec![
            Entry {
                term: 1,
                command: "a".to_string(),
            },
            Entry {
                term: 2,
                command: "b".to_string(),
            },
        ];
        let bytes = codec.encode(&entries).expect("encode should succeed");
        let decoded: Vec<Entry> = codec.decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, entries);
    }

    #[test]
    fn json_codec_decode_error() {
        let codec = JsonCodec;
        let result: Result<Entry, CodecError> = codec.decode(b"not json {");
        let err = result.expect_err("garbage should not decode");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn guarded_decode_into_overwrites() {
        let codec = GuardedCodec::<JsonCodec>::default();
        let bytes = codec
            .encode(&Entry {
                term: 5,
                command: "snapshot".to_string(),
            })
            .expect("encode should succeed");

        let mut dest = Entry::default();
        codec
            .decode_into(&bytes, &mut dest)
            .expect("decode should succeed");
        assert_eq!(dest.term, 5);
        assert_eq!(dest.command, "snapshot");
    }

    #[test]
    fn guarded_decode_failure_leaves_dest() {
        let codec = GuardedCodec::<JsonCodec>::default();
        let mut dest = Entry::default();
        let result = codec.decode_into(b"][", &mut dest);
        assert!(result.is_err());
        assert_eq!(dest, Entry::default());
    }
}
