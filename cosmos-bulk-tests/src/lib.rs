//! Cosmos Bulk Tests - end-to-end tests of the bulk pipeline.
//!
//! Tests run the public `ContainerExecutor` API against a
//! [`SimulatedContainer`](simulated_container::SimulatedContainer), which
//! stores items in memory, honours range splits published through a shared
//! resolver, and injects transport and throttling faults on demand.
//!
//! ## Test Organization
//!
//! - `pipeline_tests`: bulk execution (batching, splits, retries, shutdown)
//! - `transactional_tests`: atomic batches on one partition key
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod simulated_container;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod pipeline_tests;
