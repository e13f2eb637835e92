//! In-memory model of B-tree nodes and indirect data references.

use bytes::Bytes;
use rand::RngCore;
use std::fmt;

/// Identifier of one append-only data file in the base store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DataFileId(pub [u8; 16]);

impl DataFileId {
    /// Mints a fresh random id.
    pub fn random() -> Self {
        let mut id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);
        DataFileId(id)
    }

    /// Base-store key holding this file's bytes.
    pub fn relative_key(&self) -> String {
        format!("d/{}", hex::encode(self.0))
    }
}

impl fmt::Debug for DataFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataFileId({})", hex::encode(self.0))
    }
}

/// Location of immutable bytes stored out of line: (file, offset, length).
///
/// Multiple versions may share one reference; the referenced bytes are never
/// rewritten in place.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct IndirectDataReference {
    /// Data file holding the bytes.
    pub file: DataFileId,
    /// Byte offset within the file.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

/// A leaf value, stored inline iff its length fits the configured threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafValue {
    /// Value bytes embedded directly in the node.
    Inline(Bytes),
    /// Value bytes stored out of line in a data file.
    OutOfLine(IndirectDataReference),
}

impl LeafValue {
    /// Length in bytes of the value itself (not its encoding).
    pub fn value_len(&self) -> u64 {
        match self {
            LeafValue::Inline(b) => b.len() as u64,
            LeafValue::OutOfLine(r) => r.length,
        }
    }
}

/// One `key -> value` pair in a leaf node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafEntry {
    /// The key, unique within the tree.
    pub key: Bytes,
    /// Inline bytes or an indirect reference.
    pub value: LeafValue,
}

/// Aggregate statistics for a subtree, maintained per interior entry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubtreeStats {
    /// Number of keys stored below this entry.
    pub num_keys: u64,
    /// Sum of key and value lengths below this entry.
    pub total_bytes: u64,
}

impl SubtreeStats {
    /// Component-wise sum.
    pub fn merge(self, other: SubtreeStats) -> SubtreeStats {
        SubtreeStats {
            num_keys: self.num_keys + other.num_keys,
            total_bytes: self.total_bytes + other.total_bytes,
        }
    }
}

/// One child of an interior node.
///
/// The entry stores its child's `inclusive_min`; child *i* covers
/// `[min_i, min_{i+1})`, the last child inheriting the parent's upper bound,
/// so sibling ranges partition the parent range with no gaps or overlaps by
/// construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteriorEntry {
    /// Smallest key reachable through this child.
    pub inclusive_min: Bytes,
    /// Location of the encoded child node.
    pub child: IndirectDataReference,
    /// Statistics for the child's subtree.
    pub stats: SubtreeStats,
}

/// A decoded B-tree node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Height-0 node holding the actual entries.
    Leaf {
        /// Strictly increasing, unique keys.
        entries: Vec<LeafEntry>,
    },
    /// Node above height 0 routing to children one level down.
    Interior {
        /// Height of this node (children are at `height - 1`).
        height: u8,
        /// Ordered child entries.
        entries: Vec<InteriorEntry>,
    },
}

/// Fixed per-entry overhead assumed by the split heuristic, covering tags,
/// length prefixes, and varint fields.
const ENTRY_OVERHEAD: u64 = 8;

/// Decoded size charged for an indirect reference.
const REF_SIZE: u64 = 32;

/// Estimated decoded size of one leaf entry, used for split decisions.
pub fn leaf_entry_size(entry: &LeafEntry) -> u64 {
    let value = match &entry.value {
        LeafValue::Inline(b) => b.len() as u64,
        LeafValue::OutOfLine(_) => REF_SIZE,
    };
    entry.key.len() as u64 + value + ENTRY_OVERHEAD
}

/// Estimated decoded size of one interior entry.
pub fn interior_entry_size(entry: &InteriorEntry) -> u64 {
    entry.inclusive_min.len() as u64 + REF_SIZE + ENTRY_OVERHEAD
}

impl Node {
    /// Height of the node; leaves are 0.
    pub fn height(&self) -> u8 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Interior { height, .. } => *height,
        }
    }
}
