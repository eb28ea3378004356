//! Cosmos Bulk Core - Strongly-typed identifiers and limits for the bulk pipeline.
//!
//! This crate holds the vocabulary shared by the codec, the router and the
//! executor: operation kinds, partition keys, range identifiers, status codes
//! and the batch size limits. It performs no I/O.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: A `BatchId` can't be confused with a range id
//! - **Explicit limits**: Every batch is bounded in bytes and operations
//! - **Closed classification**: Status codes are classified once into an
//!   `OutcomeCategory` instead of being re-tested at every call site
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod status;
mod types;

pub use error::{Error, Result};
pub use limits::BatchLimits;
pub use status::{status_codes, sub_status_codes, OutcomeCategory};
pub use types::{
    BatchId, IndexingDirective, OperationType, PartitionKey, PartitionKeyRangeId,
    DOCUMENT_RESOURCE_TYPE,
};
