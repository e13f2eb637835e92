//! Lookup and range scans over a committed root.

use bytes::Bytes;
use std::collections::VecDeque;

use crate::config::Config;
use crate::error::{Result, VellumError};
use crate::format::key::KeyRange;
use crate::format::manifest::BtreeRoot;
use crate::format::node::{InteriorEntry, LeafEntry, LeafValue, Node};
use crate::tree::{check_height, TreeIo};

/// Finds `key` under `root`, descending one node per level.
pub(crate) async fn lookup(
    io: &TreeIo,
    config: &Config,
    root: &BtreeRoot,
    key: &[u8],
) -> Result<Option<LeafValue>> {
    let mut location = root.location;
    let mut expected_height = root.height;
    loop {
        let node = io.fetch_node(config, location).await?;
        check_height(&node, expected_height)?;
        match node {
            Node::Leaf { entries } => {
                return Ok(entries
                    .binary_search_by(|e| e.key[..].cmp(key))
                    .ok()
                    .map(|i| entries[i].value.clone()));
            }
            Node::Interior { height, entries } => {
                // Last child whose inclusive_min <= key.
                let idx = entries.partition_point(|e| e.inclusive_min[..] <= *key);
                if idx == 0 {
                    return Ok(None);
                }
                location = entries[idx - 1].child;
                expected_height = height - 1;
            }
        }
    }
}

/// Covered range of child `i`, derived from sibling minima and the parent's
/// own covered range.
pub(crate) fn child_covered_range(
    entries: &[InteriorEntry],
    i: usize,
    parent: &KeyRange,
) -> KeyRange {
    let inclusive_min = if i == 0 {
        parent.inclusive_min.clone()
    } else {
        entries[i].inclusive_min.clone()
    };
    let exclusive_max = match entries.get(i + 1) {
        Some(next) => next.inclusive_min.clone(),
        None => parent.exclusive_max.clone(),
    };
    KeyRange {
        inclusive_min,
        exclusive_max,
    }
}

enum Frame {
    /// Undescended children of an interior node, newest fetch on top.
    Interior {
        entries: Vec<InteriorEntry>,
        covered: KeyRange,
        child_height: u8,
        next: usize,
    },
    /// Decoded leaves ready to yield, in key order.
    Leaves { pending: VecDeque<LeafEntry> },
}

/// Lazy, in-order scan of a key range.
///
/// Subtrees whose covered range does not intersect the query are pruned
/// without being fetched. When descending the last interior level all
/// intersecting leaves are requested in one batch so adjacent reads coalesce.
/// The scanner is restartable: construct a new one whose `inclusive_min` is
/// the successor of the last yielded key.
pub struct RangeScanner {
    io: TreeIo,
    config: Config,
    range: KeyRange,
    stack: Vec<Frame>,
}

impl RangeScanner {
    pub(crate) fn new(
        io: TreeIo,
        config: Config,
        root: Option<BtreeRoot>,
        range: KeyRange,
    ) -> Self {
        let mut scanner = RangeScanner {
            io,
            config,
            range,
            stack: Vec::new(),
        };
        if let Some(root) = root {
            if !scanner.range.is_empty() {
                scanner.stack.push(Frame::Interior {
                    entries: vec![InteriorEntry {
                        inclusive_min: Bytes::new(),
                        child: root.location,
                        stats: root.stats,
                    }],
                    covered: KeyRange::all(),
                    child_height: root.height,
                    next: 0,
                });
            }
        }
        scanner
    }

    /// Next `(key, value)` pair in key order, or `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<(Bytes, LeafValue)>> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(None);
            };
            match top {
                Frame::Leaves { pending } => match pending.pop_front() {
                    Some(entry) => {
                        if !self.range.contains(&entry.key) {
                            continue;
                        }
                        return Ok(Some((entry.key, entry.value)));
                    }
                    None => {
                        self.stack.pop();
                    }
                },
                Frame::Interior {
                    entries,
                    covered,
                    child_height,
                    next,
                } => {
                    if *child_height == 0 {
                        // Batch-fetch every intersecting leaf below this node.
                        let mut wanted = Vec::new();
                        for i in *next..entries.len() {
                            if child_covered_range(entries, i, covered).intersects(&self.range) {
                                wanted.push(entries[i].child);
                            }
                        }
                        self.stack.pop();
                        if wanted.is_empty() {
                            continue;
                        }
                        let blobs = self.io.data_reader().read_many(&wanted).await?;
                        let mut pending = VecDeque::new();
                        for blob in blobs {
                            let node =
                                crate::format::codec::decode_node(&blob, &self.config)?;
                            check_height(&node, 0)?;
                            let Node::Leaf { entries } = node else {
                                return Err(VellumError::Corruption("expected leaf node"));
                            };
                            pending.extend(entries);
                        }
                        self.stack.push(Frame::Leaves { pending });
                        continue;
                    }
                    // Descend the next intersecting child, one at a time.
                    let mut descend = None;
                    while *next < entries.len() {
                        let i = *next;
                        *next += 1;
                        let child_range = child_covered_range(entries, i, covered);
                        if child_range.intersects(&self.range) {
                            descend = Some((entries[i].child, *child_height, child_range));
                            break;
                        }
                    }
                    let Some((child, height, child_range)) = descend else {
                        self.stack.pop();
                        continue;
                    };
                    let node = self.io.fetch_node(&self.config, child).await?;
                    check_height(&node, height)?;
                    match node {
                        Node::Leaf { entries } => {
                            self.stack.push(Frame::Leaves {
                                pending: entries.into(),
                            });
                        }
                        Node::Interior {
                            height: child_h,
                            entries: child_entries,
                        } => {
                            self.stack.push(Frame::Interior {
                                entries: child_entries,
                                covered: child_range,
                                child_height: child_h - 1,
                                next: 0,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Drains the scanner into a vector, resolving out-of-line values.
    pub async fn collect_resolved(mut self) -> Result<Vec<(Bytes, Bytes)>> {
        let mut out = Vec::new();
        while let Some((key, value)) = self.next().await? {
            let bytes = self.io.resolve_value(&value).await?;
            out.push((key, bytes));
        }
        Ok(out)
    }
}
