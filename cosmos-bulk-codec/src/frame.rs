//! Batch body framing.
//!
//! The request side is built incrementally by [`BatchRequestEncoder`], which
//! enforces the body-length bound while writing. Its accepted count is the
//! only record of which operations made it into the body.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};
use crate::record::{ensure_remaining, OperationRecord, OutcomeRecord};

/// Version tag written as the first byte of every batch body.
pub const BATCH_FORMAT_VERSION: u8 = 1;

/// Length prefix in front of every record.
pub const RECORD_HEADER_BYTES: usize = 4;

/// Bytes taken by the version tag.
const VERSION_BYTES: usize = 1;

/// A serialized batch request body.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// The full body, version byte included.
    pub body: Bytes,
    /// How many leading operations were written. Everything after this index
    /// overflowed and must go into a later batch.
    pub accepted: usize,
}

/// Incremental request body writer with a body-length bound.
///
/// Records are appended in order. Once one record is refused for size, all
/// later records are refused too so that the accepted set is always a prefix
/// of the input order. The first record is always accepted, even when it
/// alone exceeds the bound.
#[derive(Debug)]
pub struct BatchRequestEncoder {
    buf: BytesMut,
    max_body_length: usize,
    accepted: usize,
    overflowed: bool,
}

impl BatchRequestEncoder {
    /// Creates an encoder for a body of at most `max_body_length` bytes.
    #[must_use]
    pub fn new(max_body_length: u32) -> Self {
        let max_body_length = max_body_length as usize;
        let mut buf = BytesMut::with_capacity(max_body_length.min(64 * 1024));
        buf.put_u8(BATCH_FORMAT_VERSION);
        Self {
            buf,
            max_body_length,
            accepted: 0,
            overflowed: false,
        }
    }

    /// Appends a record if it fits.
    ///
    /// Returns `Ok(true)` if written, `Ok(false)` if the record (and every
    /// record after it) overflows.
    ///
    /// # Errors
    /// Returns an error if the record is larger than a u32 length prefix
    /// can describe.
    pub fn push(&mut self, record: &OperationRecord) -> CodecResult<bool> {
        if self.overflowed {
            return Ok(false);
        }

        let payload_len = record.payload_len();
        let frame_len = RECORD_HEADER_BYTES + payload_len;
        let prefix = u32::try_from(payload_len)
            .map_err(|_| CodecError::RecordTooLarge { size: payload_len })?;

        if self.accepted > 0 && self.buf.len() + frame_len > self.max_body_length {
            self.overflowed = true;
            return Ok(false);
        }

        self.buf.reserve(frame_len);
        self.buf.put_u32_le(prefix);
        record.encode_payload(&mut self.buf);
        self.accepted += 1;
        Ok(true)
    }

    /// Returns the number of records written so far.
    #[must_use]
    pub const fn accepted(&self) -> usize {
        self.accepted
    }

    /// Returns the current body length, version byte included.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.buf.len()
    }

    /// Finishes the body.
    #[must_use]
    pub fn finish(self) -> EncodedBatch {
        EncodedBatch {
            body: self.buf.freeze(),
            accepted: self.accepted,
        }
    }
}

/// Decodes a request body back into records.
///
/// # Errors
/// Returns an error on a version mismatch or malformed data.
pub fn decode_batch_request(data: &[u8]) -> CodecResult<Vec<OperationRecord>> {
    decode_records(data, OperationRecord::decode_payload)
}

/// Encodes a response body from per-operation outcomes.
///
/// # Errors
/// Returns an error if an outcome is larger than a u32 length prefix can
/// describe.
pub fn encode_batch_response(outcomes: &[OutcomeRecord]) -> CodecResult<Bytes> {
    let total: usize = outcomes
        .iter()
        .map(|o| RECORD_HEADER_BYTES + o.payload_len())
        .sum();
    let mut buf = BytesMut::with_capacity(VERSION_BYTES + total);
    buf.put_u8(BATCH_FORMAT_VERSION);

    for outcome in outcomes {
        let payload_len = outcome.payload_len();
        let prefix = u32::try_from(payload_len)
            .map_err(|_| CodecError::RecordTooLarge { size: payload_len })?;
        buf.put_u32_le(prefix);
        outcome.encode_payload(&mut buf);
    }

    Ok(buf.freeze())
}

/// Decodes a response body into per-operation outcomes, in order.
///
/// # Errors
/// Returns an error on a version mismatch or malformed data.
pub fn decode_batch_response(data: &[u8]) -> CodecResult<Vec<OutcomeRecord>> {
    decode_records(data, OutcomeRecord::decode_payload)
}

fn decode_records<T>(
    data: &[u8],
    decode_payload: impl Fn(&[u8]) -> CodecResult<T>,
) -> CodecResult<Vec<T>> {
    ensure_remaining(data, VERSION_BYTES)?;

    let mut buf = data;
    let version = buf.get_u8();
    if version != BATCH_FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            expected: BATCH_FORMAT_VERSION,
        });
    }

    let mut records = Vec::new();
    while buf.has_remaining() {
        ensure_remaining(buf, RECORD_HEADER_BYTES)?;
        let len = buf.get_u32_le() as usize;
        ensure_remaining(buf, len)?;
        let (payload, rest) = buf.split_at(len);
        records.push(decode_payload(payload)?);
        buf = rest;
    }

    Ok(records)
}
