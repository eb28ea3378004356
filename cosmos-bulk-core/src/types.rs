//! Strongly-typed identifiers and operation vocabulary.
//!
//! Explicit types prevent bugs from mixing up ids and raw wire values.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Wire value of the `resourceType` field. Batches only carry documents.
pub const DOCUMENT_RESOURCE_TYPE: i32 = 2;

/// Macro to generate strongly-typed u64 ID wrappers.
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }
    };
}

define_id!(
    BatchId,
    "batch",
    "Identity of one batcher; used to detect completions by a batcher that does not own an operation."
);

/// Identifier of a physical partition key range, e.g. `"0"` or `"42"`.
///
/// Range ids are opaque strings assigned by the service. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKeyRangeId(Arc<str>);

impl PartitionKeyRangeId {
    /// Creates a range id.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PartitionKeyRangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkrange({})", self.0)
    }
}

impl fmt::Display for PartitionKeyRangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKeyRangeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The kind of item operation carried in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Insert a new item; fails with 409 if it exists.
    Create,
    /// Read an item by id.
    Read,
    /// Replace an existing item.
    Replace,
    /// Insert or replace an item.
    Upsert,
    /// Delete an item by id.
    Delete,
    /// Apply a partial update document to an item.
    Patch,
}

impl OperationType {
    /// Returns the wire value.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Create => 0,
            Self::Read => 1,
            Self::Replace => 2,
            Self::Upsert => 3,
            Self::Delete => 4,
            Self::Patch => 5,
        }
    }

    /// Parses a wire value.
    ///
    /// # Errors
    /// Returns an error if the value is not a known operation type.
    pub const fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Create),
            1 => Ok(Self::Read),
            2 => Ok(Self::Replace),
            3 => Ok(Self::Upsert),
            4 => Ok(Self::Delete),
            5 => Ok(Self::Patch),
            other => Err(Error::UnknownValue {
                kind: "operation type",
                value: other as i64,
            }),
        }
    }

    /// Returns true if the operation sends a resource body.
    #[must_use]
    pub const fn has_body(self) -> bool {
        matches!(
            self,
            Self::Create | Self::Replace | Self::Upsert | Self::Patch
        )
    }

    /// Returns true if the operation addresses an existing item by id.
    #[must_use]
    pub const fn requires_id(self) -> bool {
        matches!(
            self,
            Self::Read | Self::Replace | Self::Delete | Self::Patch
        )
    }

    /// Returns a short label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Replace => "replace",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::Patch => "patch",
        }
    }
}

/// Per-operation indexing directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexingDirective {
    /// Use the container's indexing policy.
    Default,
    /// Force the item into the index.
    Include,
    /// Keep the item out of the index.
    Exclude,
}

impl IndexingDirective {
    /// Returns the wire string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Include => "Include",
            Self::Exclude => "Exclude",
        }
    }

    /// Parses a wire string.
    ///
    /// # Errors
    /// Returns an error for an unrecognized directive.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "Default" => Ok(Self::Default),
            "Include" => Ok(Self::Include),
            "Exclude" => Ok(Self::Exclude),
            _ => Err(Error::InvalidArgument {
                name: "indexing_directive",
                reason: "must be Default, Include or Exclude",
            }),
        }
    }
}

/// A logical partition key, held in its JSON wire form (`["value"]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    json: String,
}

impl PartitionKey {
    /// Creates a single-component partition key from a JSON value.
    #[must_use]
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        let components = serde_json::Value::Array(vec![value.into()]);
        Self {
            json: components.to_string(),
        }
    }

    /// Creates a hierarchical partition key from several components.
    ///
    /// # Errors
    /// Returns an error if no components are supplied.
    pub fn hierarchical<I, V>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<serde_json::Value>,
    {
        let values: Vec<serde_json::Value> = components.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(Error::InvalidArgument {
                name: "partition_key",
                reason: "must have at least one component",
            });
        }
        Ok(Self {
            json: serde_json::Value::Array(values).to_string(),
        })
    }

    /// Wraps an already serialized JSON array.
    ///
    /// # Errors
    /// Returns an error if the text is not a non-empty JSON array.
    pub fn from_json(json: impl Into<String>) -> Result<Self> {
        let json = json.into();
        match serde_json::from_str::<serde_json::Value>(&json) {
            Ok(serde_json::Value::Array(values)) if !values.is_empty() => Ok(Self { json }),
            _ => Err(Error::InvalidArgument {
                name: "partition_key",
                reason: "must be a non-empty JSON array",
            }),
        }
    }

    /// Returns the JSON wire form.
    #[must_use]
    pub fn as_json(&self) -> &str {
        &self.json
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.json)
    }
}
