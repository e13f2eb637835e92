//! Mutation batches: ordered operations applied atomically by one commit.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::Result;
use crate::format::key::{validate_key, KeyRange};

/// One mutation inside a batch.
#[derive(Clone, Debug)]
pub enum Mutation {
    /// Insert or replace a key.
    Put {
        /// The key.
        key: Bytes,
        /// The new value.
        value: Bytes,
    },
    /// Remove a single key.
    Delete {
        /// The key.
        key: Bytes,
    },
    /// Remove every key in a range.
    DeleteRange {
        /// The affected half-open range.
        range: KeyRange,
    },
}

/// Ordered mutations accumulated ahead of a single atomic commit.
///
/// Operations apply in submission order: a later put resurrects a key a
/// preceding range delete removed.
#[derive(Clone, Debug, Default)]
pub struct MutationBatch {
    ops: Vec<Mutation>,
}

impl MutationBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        MutationBatch::default()
    }

    /// Appends a put.
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;
        self.ops.push(Mutation::Put {
            key,
            value: value.into(),
        });
        Ok(())
    }

    /// Appends a single-key delete.
    pub fn delete(&mut self, key: impl Into<Bytes>) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;
        self.ops.push(Mutation::Delete { key });
        Ok(())
    }

    /// Appends a range delete.
    pub fn delete_range(&mut self, range: KeyRange) -> Result<()> {
        if !range.is_empty() {
            self.ops.push(Mutation::DeleteRange { range });
        }
        Ok(())
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Collapses the batch to its net effect: delete ranges, then point
    /// writes, preserving submission-order semantics.
    pub(crate) fn normalize(&self) -> NormalizedBatch {
        let mut points: BTreeMap<Vec<u8>, Option<Bytes>> = BTreeMap::new();
        let mut ranges: Vec<KeyRange> = Vec::new();
        for op in &self.ops {
            match op {
                Mutation::Put { key, value } => {
                    points.insert(key.to_vec(), Some(value.clone()));
                }
                Mutation::Delete { key } => {
                    points.insert(key.to_vec(), None);
                }
                Mutation::DeleteRange { range } => {
                    // The range erases every point op that preceded it.
                    let stale: Vec<Vec<u8>> = points
                        .range(range_bounds(range))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in stale {
                        points.remove(&key);
                    }
                    ranges.push(range.clone());
                }
            }
        }
        NormalizedBatch {
            points,
            ranges: merge_ranges(ranges),
        }
    }
}

fn range_bounds(range: &KeyRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let lower = Bound::Included(range.inclusive_min.to_vec());
    let upper = if range.is_unbounded_above() {
        Bound::Unbounded
    } else {
        Bound::Excluded(range.exclusive_max.to_vec())
    };
    (lower, upper)
}

fn merge_ranges(mut ranges: Vec<KeyRange>) -> Vec<KeyRange> {
    ranges.sort_by(|a, b| a.inclusive_min.cmp(&b.inclusive_min));
    let mut merged: Vec<KeyRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last)
                if last.is_unbounded_above() || range.inclusive_min <= last.exclusive_max =>
            {
                if crate::format::key::cmp_exclusive_max(&range.exclusive_max, &last.exclusive_max)
                    == std::cmp::Ordering::Greater
                {
                    last.exclusive_max = range.exclusive_max;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// The net effect of a batch: disjoint delete ranges applied before the
/// point writes.
#[derive(Clone, Debug, Default)]
pub(crate) struct NormalizedBatch {
    points: BTreeMap<Vec<u8>, Option<Bytes>>,
    ranges: Vec<KeyRange>,
}

impl NormalizedBatch {
    /// Point operations with keys inside `covered`, in key order.
    pub(crate) fn points_in<'a>(
        &'a self,
        covered: &KeyRange,
    ) -> impl Iterator<Item = (&'a [u8], Option<&'a Bytes>)> + 'a {
        self.points
            .range(range_bounds(covered))
            .map(|(k, v)| (k.as_slice(), v.as_ref()))
    }

    /// Whether any put lands inside `covered`.
    pub(crate) fn has_put_in(&self, covered: &KeyRange) -> bool {
        self.points_in(covered).any(|(_, v)| v.is_some())
    }

    /// Whether any point op touches `covered`.
    pub(crate) fn has_points_in(&self, covered: &KeyRange) -> bool {
        self.points_in(covered).next().is_some()
    }

    /// Whether any delete range intersects `covered`.
    pub(crate) fn ranges_intersect(&self, covered: &KeyRange) -> bool {
        self.ranges.iter().any(|r| r.intersects(covered))
    }

    /// Whether some delete range fully covers `covered`.
    pub(crate) fn fully_deletes(&self, covered: &KeyRange) -> bool {
        self.ranges.iter().any(|r| r.contains_range(covered))
    }

    /// Whether `key` falls inside any delete range.
    pub(crate) fn deletes_key(&self, key: &[u8]) -> bool {
        let idx = self
            .ranges
            .partition_point(|r| !r.is_unbounded_above() && r.exclusive_max[..] <= *key);
        self.ranges.get(idx).is_some_and(|r| r.contains(key))
    }

    /// Whether the batch leaves `covered` completely untouched.
    pub(crate) fn skips(&self, covered: &KeyRange) -> bool {
        !self.has_points_in(covered) && !self.ranges_intersect(covered)
    }
}
