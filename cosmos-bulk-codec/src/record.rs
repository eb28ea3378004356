//! Request and response record schemas.
//!
//! # Request fields
//!
//! | Tag | Field | Type |
//! |-----|-------|------|
//! | 1 | `operationType` | i32 |
//! | 2 | `resourceType` | i32 (always Document) |
//! | 3 | `partitionKey` | string (JSON) |
//! | 4 | `id` | string |
//! | 5 | `resourceBody` | binary |
//! | 6 | `indexingDirective` | string |
//! | 7 | `ifMatch` | string |
//! | 8 | `ifNoneMatch` | string |
//! | 9 | `binaryId` | binary |
//! | 10 | `effectivePartitionKey` | binary |
//! | 11 | `timeToLiveInSeconds` | i32 |
//!
//! # Response fields
//!
//! | Tag | Field | Type |
//! |-----|-------|------|
//! | 1 | `statusCode` | i32 |
//! | 2 | `subStatusCode` | i32 |
//! | 3 | `eTag` | string |
//! | 4 | `resourceBody` | binary |
//! | 5 | `requestCharge` | f64 |
//! | 6 | `retryAfterMilliseconds` | u32 |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cosmos_bulk_core::{IndexingDirective, OperationType, DOCUMENT_RESOURCE_TYPE};

use crate::error::{CodecError, CodecResult};

const REQ_OPERATION_TYPE: u8 = 1;
const REQ_RESOURCE_TYPE: u8 = 2;
const REQ_PARTITION_KEY: u8 = 3;
const REQ_ID: u8 = 4;
const REQ_RESOURCE_BODY: u8 = 5;
const REQ_INDEXING_DIRECTIVE: u8 = 6;
const REQ_IF_MATCH: u8 = 7;
const REQ_IF_NONE_MATCH: u8 = 8;
const REQ_BINARY_ID: u8 = 9;
const REQ_EFFECTIVE_PARTITION_KEY: u8 = 10;
const REQ_TIME_TO_LIVE: u8 = 11;

const RESP_STATUS_CODE: u8 = 1;
const RESP_SUB_STATUS_CODE: u8 = 2;
const RESP_ETAG: u8 = 3;
const RESP_RESOURCE_BODY: u8 = 4;
const RESP_REQUEST_CHARGE: u8 = 5;
const RESP_RETRY_AFTER_MS: u8 = 6;

/// Tag byte plus a 4-byte fixed-width value.
const FIXED_32_FIELD_BYTES: usize = 1 + 4;
/// Tag byte plus an 8-byte fixed-width value.
const FIXED_64_FIELD_BYTES: usize = 1 + 8;
/// Tag byte plus a u32 length prefix.
const VARIABLE_FIELD_OVERHEAD: usize = 1 + 4;

/// One operation as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    /// The operation kind.
    pub operation_type: OperationType,
    /// JSON partition key.
    pub partition_key: Option<String>,
    /// Item id.
    pub id: Option<String>,
    /// Materialized item body.
    pub resource_body: Option<Bytes>,
    /// Indexing directive.
    pub indexing_directive: Option<IndexingDirective>,
    /// If-Match etag.
    pub if_match: Option<String>,
    /// If-None-Match etag.
    pub if_none_match: Option<String>,
    /// Binary item id.
    pub binary_id: Option<Bytes>,
    /// Pre-computed effective partition key.
    pub effective_partition_key: Option<Bytes>,
    /// Item time-to-live.
    pub time_to_live_seconds: Option<i32>,
}

impl OperationRecord {
    /// Creates a record with only the operation type set.
    #[must_use]
    pub const fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            partition_key: None,
            id: None,
            resource_body: None,
            indexing_directive: None,
            if_match: None,
            if_none_match: None,
            binary_id: None,
            effective_partition_key: None,
            time_to_live_seconds: None,
        }
    }

    /// Returns the exact payload length (excluding the record header).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        let mut len = FIXED_32_FIELD_BYTES * 2;
        len += opt_str_len(self.partition_key.as_deref());
        len += opt_str_len(self.id.as_deref());
        len += opt_bin_len(self.resource_body.as_ref());
        len += opt_str_len(self.indexing_directive.map(IndexingDirective::as_str));
        len += opt_str_len(self.if_match.as_deref());
        len += opt_str_len(self.if_none_match.as_deref());
        len += opt_bin_len(self.binary_id.as_ref());
        len += opt_bin_len(self.effective_partition_key.as_ref());
        if self.time_to_live_seconds.is_some() {
            len += FIXED_32_FIELD_BYTES;
        }
        len
    }

    pub(crate) fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(REQ_OPERATION_TYPE);
        buf.put_i32_le(self.operation_type.code());
        buf.put_u8(REQ_RESOURCE_TYPE);
        buf.put_i32_le(DOCUMENT_RESOURCE_TYPE);

        put_opt_str(buf, REQ_PARTITION_KEY, self.partition_key.as_deref());
        put_opt_str(buf, REQ_ID, self.id.as_deref());
        put_opt_bin(buf, REQ_RESOURCE_BODY, self.resource_body.as_ref());
        put_opt_str(
            buf,
            REQ_INDEXING_DIRECTIVE,
            self.indexing_directive.map(IndexingDirective::as_str),
        );
        put_opt_str(buf, REQ_IF_MATCH, self.if_match.as_deref());
        put_opt_str(buf, REQ_IF_NONE_MATCH, self.if_none_match.as_deref());
        put_opt_bin(buf, REQ_BINARY_ID, self.binary_id.as_ref());
        put_opt_bin(
            buf,
            REQ_EFFECTIVE_PARTITION_KEY,
            self.effective_partition_key.as_ref(),
        );
        if let Some(ttl) = self.time_to_live_seconds {
            buf.put_u8(REQ_TIME_TO_LIVE);
            buf.put_i32_le(ttl);
        }
    }

    pub(crate) fn decode_payload(mut buf: &[u8]) -> CodecResult<Self> {
        let mut operation_type = None;
        let mut resource_type = None;
        let mut record = Self::new(OperationType::Create);

        while buf.has_remaining() {
            let tag = buf.get_u8();
            match tag {
                REQ_OPERATION_TYPE => {
                    let code = get_i32(&mut buf)?;
                    let parsed =
                        OperationType::from_code(code).map_err(|e| CodecError::InvalidValue {
                            field: "operationType",
                            reason: e.to_string(),
                        })?;
                    operation_type = Some(parsed);
                }
                REQ_RESOURCE_TYPE => resource_type = Some(get_i32(&mut buf)?),
                REQ_PARTITION_KEY => {
                    record.partition_key = Some(get_string(&mut buf, "partitionKey")?);
                }
                REQ_ID => record.id = Some(get_string(&mut buf, "id")?),
                REQ_RESOURCE_BODY => record.resource_body = Some(get_binary(&mut buf)?),
                REQ_INDEXING_DIRECTIVE => {
                    let raw = get_string(&mut buf, "indexingDirective")?;
                    let directive =
                        IndexingDirective::parse(&raw).map_err(|e| CodecError::InvalidValue {
                            field: "indexingDirective",
                            reason: e.to_string(),
                        })?;
                    record.indexing_directive = Some(directive);
                }
                REQ_IF_MATCH => record.if_match = Some(get_string(&mut buf, "ifMatch")?),
                REQ_IF_NONE_MATCH => {
                    record.if_none_match = Some(get_string(&mut buf, "ifNoneMatch")?);
                }
                REQ_BINARY_ID => record.binary_id = Some(get_binary(&mut buf)?),
                REQ_EFFECTIVE_PARTITION_KEY => {
                    record.effective_partition_key = Some(get_binary(&mut buf)?);
                }
                REQ_TIME_TO_LIVE => record.time_to_live_seconds = Some(get_i32(&mut buf)?),
                other => {
                    return Err(CodecError::UnknownField {
                        record: "operation",
                        tag: other,
                    })
                }
            }
        }

        record.operation_type = operation_type.ok_or(CodecError::MissingField {
            field: "operationType",
        })?;
        match resource_type {
            Some(DOCUMENT_RESOURCE_TYPE) => Ok(record),
            Some(other) => Err(CodecError::InvalidValue {
                field: "resourceType",
                reason: format!("expected document ({DOCUMENT_RESOURCE_TYPE}), got {other}"),
            }),
            None => Err(CodecError::MissingField {
                field: "resourceType",
            }),
        }
    }
}

/// One per-operation outcome as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    /// HTTP-style status code.
    pub status_code: i32,
    /// Service sub-status code.
    pub sub_status_code: i32,
    /// Item etag after the operation.
    pub etag: Option<String>,
    /// Item body returned by the service.
    pub resource_body: Option<Bytes>,
    /// Request units consumed by the operation.
    pub request_charge: f64,
    /// Suggested backoff for throttled operations.
    pub retry_after_ms: u32,
}

impl OutcomeRecord {
    /// Creates an outcome with only a status code.
    #[must_use]
    pub const fn with_status(status_code: i32, sub_status_code: i32) -> Self {
        Self {
            status_code,
            sub_status_code,
            etag: None,
            resource_body: None,
            request_charge: 0.0,
            retry_after_ms: 0,
        }
    }

    pub(crate) fn payload_len(&self) -> usize {
        FIXED_32_FIELD_BYTES * 2
            + opt_str_len(self.etag.as_deref())
            + opt_bin_len(self.resource_body.as_ref())
            + FIXED_64_FIELD_BYTES
            + FIXED_32_FIELD_BYTES
    }

    pub(crate) fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(RESP_STATUS_CODE);
        buf.put_i32_le(self.status_code);
        buf.put_u8(RESP_SUB_STATUS_CODE);
        buf.put_i32_le(self.sub_status_code);
        put_opt_str(buf, RESP_ETAG, self.etag.as_deref());
        put_opt_bin(buf, RESP_RESOURCE_BODY, self.resource_body.as_ref());
        buf.put_u8(RESP_REQUEST_CHARGE);
        buf.put_f64_le(self.request_charge);
        buf.put_u8(RESP_RETRY_AFTER_MS);
        buf.put_u32_le(self.retry_after_ms);
    }

    pub(crate) fn decode_payload(mut buf: &[u8]) -> CodecResult<Self> {
        let mut status_code = None;
        let mut record = Self::with_status(0, 0);

        while buf.has_remaining() {
            let tag = buf.get_u8();
            match tag {
                RESP_STATUS_CODE => status_code = Some(get_i32(&mut buf)?),
                RESP_SUB_STATUS_CODE => record.sub_status_code = get_i32(&mut buf)?,
                RESP_ETAG => record.etag = Some(get_string(&mut buf, "eTag")?),
                RESP_RESOURCE_BODY => record.resource_body = Some(get_binary(&mut buf)?),
                RESP_REQUEST_CHARGE => {
                    ensure_remaining(buf, 8)?;
                    record.request_charge = buf.get_f64_le();
                }
                RESP_RETRY_AFTER_MS => {
                    ensure_remaining(buf, 4)?;
                    record.retry_after_ms = buf.get_u32_le();
                }
                other => {
                    return Err(CodecError::UnknownField {
                        record: "outcome",
                        tag: other,
                    })
                }
            }
        }

        record.status_code = status_code.ok_or(CodecError::MissingField {
            field: "statusCode",
        })?;
        Ok(record)
    }
}

fn opt_str_len(value: Option<&str>) -> usize {
    value.map_or(0, |s| VARIABLE_FIELD_OVERHEAD + s.len())
}

fn opt_bin_len(value: Option<&Bytes>) -> usize {
    value.map_or(0, |b| VARIABLE_FIELD_OVERHEAD + b.len())
}

// Lengths are bounded by the record size check in `frame`, which rejects
// anything a u32 cannot describe before a payload is written.
#[allow(clippy::cast_possible_truncation)]
fn put_opt_str(buf: &mut BytesMut, tag: u8, value: Option<&str>) {
    if let Some(s) = value {
        buf.put_u8(tag);
        buf.put_u32_le(s.len() as u32);
        buf.put_slice(s.as_bytes());
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_opt_bin(buf: &mut BytesMut, tag: u8, value: Option<&Bytes>) {
    if let Some(b) = value {
        buf.put_u8(tag);
        buf.put_u32_le(b.len() as u32);
        buf.put_slice(b);
    }
}

pub(crate) const fn ensure_remaining(buf: &[u8], need: usize) -> CodecResult<()> {
    if buf.len() < need {
        return Err(CodecError::InsufficientData {
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

fn get_i32(buf: &mut &[u8]) -> CodecResult<i32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn get_slice<'a>(buf: &mut &'a [u8]) -> CodecResult<&'a [u8]> {
    ensure_remaining(buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure_remaining(buf, len)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn get_string(buf: &mut &[u8], field: &'static str) -> CodecResult<String> {
    let raw = get_slice(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|e| CodecError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

fn get_binary(buf: &mut &[u8]) -> CodecResult<Bytes> {
    get_slice(buf).map(Bytes::copy_from_slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> OperationRecord {
        OperationRecord {
            operation_type: OperationType::Replace,
            partition_key: Some(r#"["pk"]"#.to_string()),
            id: Some("item-1".to_string()),
            resource_body: Some(Bytes::from_static(br#"{"id":"item-1"}"#)),
            indexing_directive: Some(IndexingDirective::Exclude),
            if_match: Some("\"etag-1\"".to_string()),
            if_none_match: None,
            binary_id: Some(Bytes::from_static(&[1, 2, 3])),
            effective_partition_key: Some(Bytes::from_static(&[9, 9])),
            time_to_live_seconds: Some(60),
        }
    }

    #[test]
    fn test_payload_len_matches_encoding() {
        let record = full_record();
        let mut buf = BytesMut::new();
        record.encode_payload(&mut buf);
        assert_eq!(buf.len(), record.payload_len());

        let minimal = OperationRecord::new(OperationType::Delete);
        let mut buf = BytesMut::new();
        minimal.encode_payload(&mut buf);
        assert_eq!(buf.len(), minimal.payload_len());
    }

    #[test]
    fn test_operation_payload_decodes_all_fields() {
        let record = full_record();
        let mut buf = BytesMut::new();
        record.encode_payload(&mut buf);
        assert_eq!(OperationRecord::decode_payload(&buf).unwrap(), record);
    }

    #[test]
    fn test_outcome_payload_len_matches_encoding() {
        let outcome = OutcomeRecord {
            status_code: 201,
            sub_status_code: 0,
            etag: Some("\"e\"".to_string()),
            resource_body: Some(Bytes::from_static(b"{}")),
            request_charge: 5.71,
            retry_after_ms: 0,
        };
        let mut buf = BytesMut::new();
        outcome.encode_payload(&mut buf);
        assert_eq!(buf.len(), outcome.payload_len());
        assert_eq!(OutcomeRecord::decode_payload(&buf).unwrap(), outcome);
    }

    #[test]
    fn test_missing_operation_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(REQ_RESOURCE_TYPE);
        buf.put_i32_le(DOCUMENT_RESOURCE_TYPE);
        assert_eq!(
            OperationRecord::decode_payload(&buf),
            Err(CodecError::MissingField {
                field: "operationType"
            })
        );
    }

    #[test]
    fn test_non_document_resource_type_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(REQ_OPERATION_TYPE);
        buf.put_i32_le(OperationType::Create.code());
        buf.put_u8(REQ_RESOURCE_TYPE);
        buf.put_i32_le(7);
        assert!(matches!(
            OperationRecord::decode_payload(&buf),
            Err(CodecError::InvalidValue {
                field: "resourceType",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_outcome_field_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(RESP_STATUS_CODE);
        buf.put_i32_le(200);
        buf.put_u8(42);
        assert_eq!(
            OutcomeRecord::decode_payload(&buf),
            Err(CodecError::UnknownField {
                record: "outcome",
                tag: 42
            })
        );
    }

    #[test]
    fn test_truncated_string_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(RESP_STATUS_CODE);
        buf.put_i32_le(200);
        buf.put_u8(RESP_ETAG);
        buf.put_u32_le(10);
        buf.put_slice(b"abc");
        assert!(matches!(
            OutcomeRecord::decode_payload(&buf),
            Err(CodecError::InsufficientData { need: 10, have: 3 })
        ));
    }
}
