//! Codec errors.

use thiserror::Error;

/// Errors raised while encoding or decoding batch bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The body does not start with a recognized version byte.
    #[error("unsupported batch format version: {found} (expected {expected})")]
    UnsupportedVersion {
        /// The version byte found on the wire.
        found: u8,
        /// The version this codec understands.
        expected: u8,
    },

    /// Insufficient data to decode.
    #[error("insufficient data: need {need} bytes, have {have}")]
    InsufficientData {
        /// Bytes needed.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// A record exceeds what a u32 length prefix can describe.
    #[error("record too large: {size} bytes")]
    RecordTooLarge {
        /// Encoded size.
        size: usize,
    },

    /// Unknown field tag inside a record.
    #[error("unknown field tag {tag} in {record} record")]
    UnknownField {
        /// Record kind being decoded.
        record: &'static str,
        /// The unknown tag value.
        tag: u8,
    },

    /// A required field was absent.
    #[error("missing required field '{field}'")]
    MissingField {
        /// The field name.
        field: &'static str,
    },

    /// A field held a value that could not be interpreted.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
