//! Cosmos Bulk Routing - Partition-key-range resolution.
//!
//! This crate maps partition keys to the physical partition key range that
//! currently owns them. The bulk executor consumes it through the
//! [`RangeResolver`] trait; [`HashRangeResolver`] is an in-process
//! implementation over a [`RangeMap`] with an explicit refresh step, which is
//! enough to model splits: the client keeps routing to a stale range until a
//! forced refresh picks up the published map.
//!
//! # Design
//!
//! - **Consistent hashing**: Keys map deterministically to a 32-bit hash
//! - **Versioned range map**: Every split bumps the map version
//! - **Stale-until-refreshed cache**: Mirrors how a client learns of splits

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod range_map;
mod resolver;

pub use range_map::{HashRange, RangeMap, RangeMapError, HASH_SPACE_END};
pub use resolver::{hash_key, HashRangeResolver, RangeResolver, RoutingError, RoutingKey, RoutingResult};
