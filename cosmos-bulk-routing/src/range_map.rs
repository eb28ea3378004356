//! Range map - mapping of key-hash ranges to partition key ranges.
//!
//! The hash space `[0, 2^32)` is divided into contiguous, non-overlapping
//! ranges, each owned by one partition key range id.

use std::collections::BTreeMap;

use cosmos_bulk_core::PartitionKeyRangeId;
use thiserror::Error;

/// Exclusive end of the 32-bit hash space.
pub const HASH_SPACE_END: u64 = 1 << 32;

/// Maximum number of ranges supported.
pub const RANGES_MAX: usize = 65_536;

/// A range of key hashes `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    /// Start of the range (inclusive).
    pub start: u64,
    /// End of the range (exclusive).
    pub end: u64,
}

impl HashRange {
    /// Creates a new hash range.
    ///
    /// # Panics
    ///
    /// Panics if `start >= end` or `end` is past the hash space.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start < end, "hash range start must be < end");
        assert!(end <= HASH_SPACE_END, "hash range end must be <= 2^32");
        Self { start, end }
    }

    /// Returns true if this range contains the given hash.
    #[must_use]
    pub const fn contains(&self, hash: u32) -> bool {
        let hash = hash as u64;
        hash >= self.start && hash < self.end
    }

    /// Returns the number of hash values in this range.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Splits this range at its midpoint.
    ///
    /// Returns `None` if the range holds a single hash value.
    #[must_use]
    pub fn split(&self) -> Option<(Self, Self)> {
        if self.size() < 2 {
            return None;
        }
        let mid = self.start + self.size() / 2;
        Some((Self::new(self.start, mid), Self::new(mid, self.end)))
    }
}

#[derive(Debug, Clone)]
struct RangeEntry {
    range: HashRange,
    range_id: PartitionKeyRangeId,
}

/// Maps key-hash ranges to partition key range ids.
#[derive(Debug, Clone, Default)]
pub struct RangeMap {
    /// Map from range start to entry.
    ranges: BTreeMap<u64, RangeEntry>,
    /// Version number, bumped on every change.
    version: u64,
}

impl RangeMap {
    /// Creates an empty range map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map dividing the hash space evenly among `range_ids`.
    ///
    /// # Panics
    ///
    /// Panics if `range_ids` is empty or exceeds `RANGES_MAX`.
    #[must_use]
    pub fn uniform(range_ids: &[PartitionKeyRangeId]) -> Self {
        assert!(!range_ids.is_empty(), "range ids cannot be empty");
        assert!(
            range_ids.len() <= RANGES_MAX,
            "too many ranges: {} > {}",
            range_ids.len(),
            RANGES_MAX
        );

        let count = range_ids.len() as u64;
        let width = HASH_SPACE_END / count;
        let mut map = Self::new();

        for (i, range_id) in range_ids.iter().enumerate() {
            let i = i as u64;
            let start = i * width;
            let end = if i == count - 1 {
                HASH_SPACE_END
            } else {
                (i + 1) * width
            };
            map.ranges.insert(
                start,
                RangeEntry {
                    range: HashRange::new(start, end),
                    range_id: range_id.clone(),
                },
            );
        }

        map.version = 1;
        map
    }

    /// Returns the range id owning the given hash.
    #[must_use]
    pub fn lookup(&self, hash: u32) -> Option<&PartitionKeyRangeId> {
        self.ranges
            .range(..=u64::from(hash))
            .next_back()
            .filter(|(_, entry)| entry.range.contains(hash))
            .map(|(_, entry)| &entry.range_id)
    }

    /// Returns the hash range owned by `range_id`.
    #[must_use]
    pub fn range_of(&self, range_id: &PartitionKeyRangeId) -> Option<HashRange> {
        self.ranges
            .values()
            .find(|entry| &entry.range_id == range_id)
            .map(|entry| entry.range)
    }

    /// Returns true if `range_id` currently owns part of the hash space.
    #[must_use]
    pub fn contains_range(&self, range_id: &PartitionKeyRangeId) -> bool {
        self.range_of(range_id).is_some()
    }

    /// Splits `range_id` at its midpoint into two child ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is unknown, already at the range limit,
    /// or too small to split.
    pub fn split(
        &mut self,
        range_id: &PartitionKeyRangeId,
        left_id: PartitionKeyRangeId,
        right_id: PartitionKeyRangeId,
    ) -> Result<(), RangeMapError> {
        if self.ranges.len() >= RANGES_MAX {
            return Err(RangeMapError::TooManyRanges { max: RANGES_MAX });
        }

        let range = self
            .range_of(range_id)
            .ok_or_else(|| RangeMapError::RangeNotFound {
                range_id: range_id.clone(),
            })?;
        let (left, right) = range.split().ok_or_else(|| RangeMapError::RangeTooSmall {
            range_id: range_id.clone(),
        })?;

        self.ranges.insert(
            left.start,
            RangeEntry {
                range: left,
                range_id: left_id,
            },
        );
        self.ranges.insert(
            right.start,
            RangeEntry {
                range: right,
                range_id: right_id,
            },
        );
        self.version += 1;
        Ok(())
    }

    /// Returns the number of ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns true if the map holds no ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the version number.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns all range ids in hash order.
    #[must_use]
    pub fn range_ids(&self) -> Vec<PartitionKeyRangeId> {
        self.ranges.values().map(|e| e.range_id.clone()).collect()
    }
}

/// Errors from range map operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeMapError {
    /// Too many ranges.
    #[error("too many ranges (max {max})")]
    TooManyRanges {
        /// Maximum allowed.
        max: usize,
    },
    /// Range not found.
    #[error("partition key range {range_id} not found")]
    RangeNotFound {
        /// The missing range.
        range_id: PartitionKeyRangeId,
    },
    /// Range cannot be split further.
    #[error("partition key range {range_id} is too small to split")]
    RangeTooSmall {
        /// The range that could not be split.
        range_id: PartitionKeyRangeId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<PartitionKeyRangeId> {
        names.iter().map(|n| PartitionKeyRangeId::new(n)).collect()
    }

    #[test]
    fn test_hash_range() {
        let range = HashRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(99));
        assert!(!range.contains(200));
        assert_eq!(range.size(), 100);
    }

    #[test]
    #[should_panic(expected = "start must be < end")]
    fn test_hash_range_invalid() {
        let _ = HashRange::new(100, 100);
    }

    #[test]
    fn test_uniform_covers_entire_hash_space() {
        let map = RangeMap::uniform(&ids(&["0", "1", "2"]));
        assert_eq!(map.len(), 3);
        assert_eq!(map.version(), 1);
        for hash in [0, 1000, u32::MAX / 2, u32::MAX - 1, u32::MAX] {
            assert!(map.lookup(hash).is_some(), "hash {hash} should be owned");
        }
        assert_eq!(map.lookup(0), Some(&PartitionKeyRangeId::new("0")));
        assert_eq!(map.lookup(u32::MAX), Some(&PartitionKeyRangeId::new("2")));
    }

    #[test]
    fn test_split_replaces_parent_with_children() {
        let mut map = RangeMap::uniform(&ids(&["0"]));
        let parent = PartitionKeyRangeId::new("0");
        map.split(&parent, "1".into(), "2".into()).unwrap();

        assert_eq!(map.version(), 2);
        assert_eq!(map.len(), 2);
        assert!(!map.contains_range(&parent));
        assert_eq!(map.lookup(0), Some(&PartitionKeyRangeId::new("1")));
        assert_eq!(map.lookup(u32::MAX), Some(&PartitionKeyRangeId::new("2")));
    }

    #[test]
    fn test_split_unknown_range() {
        let mut map = RangeMap::uniform(&ids(&["0"]));
        let err = map
            .split(&PartitionKeyRangeId::new("9"), "1".into(), "2".into())
            .unwrap_err();
        assert!(matches!(err, RangeMapError::RangeNotFound { .. }));
        assert_eq!(map.version(), 1);
    }

    #[test]
    fn test_range_ids_in_hash_order() {
        let map = RangeMap::uniform(&ids(&["b", "a"]));
        assert_eq!(map.range_ids(), ids(&["b", "a"]));
    }
}
