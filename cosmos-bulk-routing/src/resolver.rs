//! Range resolver - routes partition keys to partition key ranges.
//!
//! The resolver combines key hashing with a cached copy of the range map.
//! The cached copy is only replaced on a forced refresh, so a caller keeps
//! routing to the old range until it observes a range-gone response and asks
//! for a refresh.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cosmos_bulk_core::{PartitionKey, PartitionKeyRangeId};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::range_map::RangeMap;

/// What an operation is routed by.
#[derive(Debug, Clone, Copy)]
pub enum RoutingKey<'a> {
    /// A logical partition key, hashed by its JSON form.
    Logical(&'a PartitionKey),
    /// A pre-computed effective partition key.
    Effective(&'a [u8]),
}

/// Errors from routing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No range owns the key hash.
    #[error("no partition key range owns hash {hash:#x}")]
    RangeNotFound {
        /// The hash value that couldn't be routed.
        hash: u32,
    },
    /// The routing service could not be reached.
    #[error("routing unavailable: {message}")]
    Unavailable {
        /// Error description.
        message: String,
    },
}

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Resolves the partition key range that owns a key.
///
/// Implementations must be `Send + Sync`; the executor shares one resolver
/// across every add and retry.
#[async_trait]
pub trait RangeResolver: Send + Sync + 'static {
    /// Resolves the range for `key`.
    ///
    /// When `force_refresh` is set the implementation must not answer from a
    /// cache that predates the call; this is how range splits are picked up.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::RangeNotFound` if no range owns the key, or
    /// `RoutingError::Unavailable` if the routing information could not be
    /// loaded.
    async fn resolve(
        &self,
        key: RoutingKey<'_>,
        force_refresh: bool,
    ) -> RoutingResult<PartitionKeyRangeId>;
}

/// Hashes a key to a 32-bit range hash.
#[must_use]
pub fn hash_key(key: &[u8]) -> u32 {
    // Use upper bits (often better distributed).
    (xxh3_64(key) >> 32) as u32
}

/// Computes the routing hash for a key.
fn routing_hash(key: RoutingKey<'_>) -> u32 {
    match key {
        RoutingKey::Logical(pk) => hash_key(pk.as_json().as_bytes()),
        // Effective keys are already hashed; use their leading bytes directly.
        RoutingKey::Effective(epk) => match epk {
            [a, b, c, d, ..] => u32::from_be_bytes([*a, *b, *c, *d]),
            _ => hash_key(epk),
        },
    }
}

/// In-process resolver over a published and a cached [`RangeMap`].
#[derive(Debug)]
pub struct HashRangeResolver {
    /// The authoritative map (what the service currently has).
    published: RwLock<RangeMap>,
    /// The map this client routes with until it refreshes.
    cached: RwLock<RangeMap>,
    /// Number of forced refreshes served.
    refreshes: AtomicU64,
}

impl HashRangeResolver {
    /// Creates a resolver whose cache starts in sync with `map`.
    #[must_use]
    pub fn new(map: RangeMap) -> Self {
        Self {
            published: RwLock::new(map.clone()),
            cached: RwLock::new(map),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Publishes a new authoritative map without touching the cache.
    pub async fn publish(&self, map: RangeMap) {
        *self.published.write().await = map;
    }

    /// Applies `f` to the authoritative map, e.g. to split a range.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`; the map is left as `f` left it.
    pub async fn update_published<F, E>(&self, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut RangeMap) -> Result<(), E> + Send,
    {
        let mut published = self.published.write().await;
        f(&mut published)
    }

    /// Replaces the cached map with the published one.
    pub async fn refresh(&self) {
        let published = self.published.read().await.clone();
        let mut cached = self.cached.write().await;
        if cached.version() != published.version() {
            debug!(
                from_version = cached.version(),
                to_version = published.version(),
                "Range map refreshed"
            );
        }
        *cached = published;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of forced refreshes.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Returns the version of the cached map.
    pub async fn cached_version(&self) -> u64 {
        self.cached.read().await.version()
    }

    /// Returns true if `range_id` still exists in the authoritative map.
    pub async fn is_live(&self, range_id: &PartitionKeyRangeId) -> bool {
        self.published.read().await.contains_range(range_id)
    }
}

#[async_trait]
impl RangeResolver for HashRangeResolver {
    async fn resolve(
        &self,
        key: RoutingKey<'_>,
        force_refresh: bool,
    ) -> RoutingResult<PartitionKeyRangeId> {
        if force_refresh {
            self.refresh().await;
        }

        let hash = routing_hash(key);
        let cached = self.cached.read().await;
        cached
            .lookup(hash)
            .cloned()
            .ok_or(RoutingError::RangeNotFound { hash })
    }
}
