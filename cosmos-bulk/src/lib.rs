//! Cosmos Bulk - client-side bulk and transactional batch execution.
//!
//! This crate accepts a stream of per-item operations, groups them by
//! partition key range, packs them into size- and count-bounded batch
//! requests, dispatches those requests, and hands each caller the outcome of
//! its own operation.
//!
//! # Architecture
//!
//! ```text
//!                ┌───────────────────────────────────────────────────────┐
//!                │                  ContainerExecutor                    │
//! add(op) ──────►│ validate ─► materialize ─► resolve range ─► streamer  │
//!                │                                              │        │
//!                │  ┌────────────────── RangeStreamer (per range) ──┐    │
//!                │  │ current BatchBuilder ◄── add (under mutex)    │    │
//!                │  │        │ full / timer                         │    │
//!                │  │        ▼                                      │    │
//!                │  │ Batcher::dispatch (spawned)                   │    │
//!                │  │   gate ─► build ─► send ─► demultiplex        │    │
//!                │  └────────┬───────────────────────┬──────────────┘    │
//!                │           │ terminal              │ split / throttle / │
//!                │           ▼                       ▼ overflow           │
//!                │   OperationFuture           retry path ──► streamer   │
//!                └───────────────────────────────────────────────────────┘
//! ```
//!
//! `add` never waits on the network: dispatch runs in its own task and the
//! caller observes the result only through the returned [`OperationFuture`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cosmos_bulk::{BulkConfig, ContainerExecutor, ItemOperation};
//! use cosmos_bulk_core::PartitionKey;
//!
//! let executor = ContainerExecutor::builder(resolver, transport)
//!     .with_config(BulkConfig::default())
//!     .build()?;
//!
//! let pending = executor
//!     .add(ItemOperation::create(PartitionKey::new("tenant-1"), serde_json::json!({"id": "a"})))
//!     .await?;
//! let response = pending.await?;
//! assert!(response.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod batcher;
mod builder;
mod config;
mod demux;
mod error;
mod executor;
mod operation;
mod response;
mod retry;
mod serializer;
mod stats;
mod streamer;
#[cfg(test)]
mod testing;
mod transactional;
mod transport;

pub use config::BulkConfig;
pub use error::{BulkError, BulkResult};
pub use executor::{ContainerExecutor, ContainerExecutorBuilder};
pub use operation::{ItemBody, ItemOperation, ItemRequestOptions, OperationFuture};
pub use response::OperationResponse;
pub use retry::{DefaultRetryPolicy, RetryDecision, RetryPolicy, RetryPolicyConfig, RetryState};
pub use serializer::{ItemSerializer, JsonSerializer};
pub use stats::{BulkStats, BulkStatsSnapshot};
pub use transactional::{TransactionalBatch, TransactionalBatchResponse};
pub use transport::{
    BatchHeaders, BatchRequest, BatchResponse, BatchTransport, TransportError, TransportResult,
};
