//! Byte-string keys and half-open key ranges.

use bytes::Bytes;
use std::cmp::Ordering;

use crate::error::{Result, VellumError};

/// Maximum encodable key length (u16 length prefix on disk).
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Rejects keys the on-disk format cannot represent.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(VellumError::InvalidArgument("empty key".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(VellumError::InvalidArgument(format!(
            "key length {} exceeds maximum {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

/// Half-open key interval `[inclusive_min, exclusive_max)`.
///
/// An empty `exclusive_max` means the range is unbounded above; an empty
/// `inclusive_min` starts before every key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyRange {
    /// First key inside the range.
    pub inclusive_min: Bytes,
    /// First key past the range; empty means unbounded.
    pub exclusive_max: Bytes,
}

/// Compares two exclusive upper bounds, treating empty as +infinity.
pub fn cmp_exclusive_max(a: &[u8], b: &[u8]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}

impl KeyRange {
    /// The range covering every key.
    pub fn all() -> Self {
        KeyRange::default()
    }

    /// Builds a range from explicit bounds.
    pub fn new(inclusive_min: impl Into<Bytes>, exclusive_max: impl Into<Bytes>) -> Self {
        KeyRange {
            inclusive_min: inclusive_min.into(),
            exclusive_max: exclusive_max.into(),
        }
    }

    /// The range of all keys starting with `prefix`.
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        let prefix = prefix.into();
        let exclusive_max = match prefix_successor(&prefix) {
            Some(succ) => Bytes::from(succ),
            None => Bytes::new(),
        };
        KeyRange {
            inclusive_min: prefix,
            exclusive_max,
        }
    }

    /// Whether no key can satisfy the range.
    pub fn is_empty(&self) -> bool {
        !self.exclusive_max.is_empty() && self.inclusive_min >= self.exclusive_max
    }

    /// Whether the range is unbounded above.
    pub fn is_unbounded_above(&self) -> bool {
        self.exclusive_max.is_empty()
    }

    /// Whether `key` lies inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= &self.inclusive_min[..]
            && (self.is_unbounded_above() || key < &self.exclusive_max[..])
    }

    /// Whether the two ranges share at least one key.
    pub fn intersects(&self, other: &KeyRange) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Whether every key of `other` lies inside `self`.
    pub fn contains_range(&self, other: &KeyRange) -> bool {
        if other.is_empty() {
            return true;
        }
        self.inclusive_min <= other.inclusive_min
            && cmp_exclusive_max(&self.exclusive_max, &other.exclusive_max) != Ordering::Less
    }

    /// Intersection of the two ranges (possibly empty).
    pub fn intersect(&self, other: &KeyRange) -> KeyRange {
        let inclusive_min = if self.inclusive_min >= other.inclusive_min {
            self.inclusive_min.clone()
        } else {
            other.inclusive_min.clone()
        };
        let exclusive_max =
            if cmp_exclusive_max(&self.exclusive_max, &other.exclusive_max) == Ordering::Less {
                self.exclusive_max.clone()
            } else {
                other.exclusive_max.clone()
            };
        KeyRange {
            inclusive_min,
            exclusive_max,
        }
    }
}

/// Smallest key strictly greater than `key`: `key` with a NUL appended.
pub fn key_successor(key: &[u8]) -> Vec<u8> {
    let mut succ = Vec::with_capacity(key.len() + 1);
    succ.extend_from_slice(key);
    succ.push(0);
    succ
}

/// Smallest key greater than every key starting with `prefix`, if one exists.
///
/// Increments the last byte below 0xff, dropping any 0xff suffix; a prefix of
/// all 0xff bytes has no successor (the caller maps that to "unbounded").
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    for i in (0..prefix.len()).rev() {
        if prefix[i] != 0xff {
            let mut succ = prefix[..=i].to_vec();
            succ[i] += 1;
            return Some(succ);
        }
    }
    None
}
