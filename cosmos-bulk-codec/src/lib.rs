//! Cosmos Bulk Codec - RecordIO framing for batch request and response bodies.
//!
//! # Wire Format
//!
//! ```text
//! ┌─────────┬──────────────────────────┬──────────────────────────┬─────┐
//! │ version │ record 0                 │ record 1                 │ ... │
//! │ (1 B)   │ len (u32 LE) │ payload   │ len (u32 LE) │ payload   │     │
//! └─────────┴──────────────────────────┴──────────────────────────┴─────┘
//! ```
//!
//! Each payload is a sequence of fields: a 1-byte field tag followed by the
//! typed value. Strings and binaries carry a u32 little-endian length prefix.
//! Optional fields that are absent are simply not written.
//!
//! Request records describe one item operation; response records describe
//! one per-operation outcome. Response records are order-aligned with the
//! request records of the same batch.
//!
//! Decoders check the version byte before anything else and fail closed on a
//! mismatch.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod frame;
mod record;

pub use error::{CodecError, CodecResult};
pub use frame::{
    decode_batch_request, decode_batch_response, encode_batch_response, BatchRequestEncoder,
    EncodedBatch, BATCH_FORMAT_VERSION, RECORD_HEADER_BYTES,
};
pub use record::{OperationRecord, OutcomeRecord};
