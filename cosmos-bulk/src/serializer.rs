//! Item body serialization.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{BulkError, BulkResult};

/// Converts item documents to and from their wire bytes.
///
/// The executor calls [`to_bytes`](Self::to_bytes) once per operation while
/// materializing its body, before the operation is routed.
pub trait ItemSerializer: Send + Sync + 'static {
    /// Serializes a document.
    ///
    /// # Errors
    /// Returns `BulkError::Serialization` if the document cannot be encoded.
    fn to_bytes(&self, item: &Value) -> BulkResult<Bytes>;

    /// Deserializes a document.
    ///
    /// # Errors
    /// Returns `BulkError::Serialization` if the bytes are not a document.
    fn from_bytes(&self, data: &[u8]) -> BulkResult<Value>;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ItemSerializer for JsonSerializer {
    fn to_bytes(&self, item: &Value) -> BulkResult<Bytes> {
        serde_json::to_vec(item)
            .map(Bytes::from)
            .map_err(|e| BulkError::Serialization {
                message: e.to_string(),
            })
    }

    fn from_bytes(&self, data: &[u8]) -> BulkResult<Value> {
        serde_json::from_slice(data).map_err(|e| BulkError::Serialization {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_serializer() {
        let item = json!({"id": "a", "n": 1});
        let bytes = JsonSerializer.to_bytes(&item).unwrap();
        assert_eq!(JsonSerializer.from_bytes(&bytes).unwrap(), item);
    }

    #[test]
    fn test_json_serializer_rejects_garbage() {
        let err = JsonSerializer.from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, BulkError::Serialization { .. }));
    }
}
