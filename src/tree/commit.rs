//! The commit engine: copy-on-write application of a mutation batch.
//!
//! A commit descends the previous root cloning only the paths the batch
//! touches. Subtrees the batch skips are kept by reference without being
//! fetched; subtrees a delete range fully covers are dropped unread. A leaf
//! whose merged entries equal its prior entries keeps its prior location with
//! no new write (encoding is deterministic, so equal entries encode
//! identically). Adjacent rebuilt leaves are re-packed together so churn does
//! not leave undersized nodes behind. The new manifest is published with a
//! conditional write keyed on the token the manifest was loaded under,
//! retrying with jittered backoff on conflict.

use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::batch::{MutationBatch, NormalizedBatch};
use crate::config::{Config, ConfigConstraints};
use crate::datafile::DataFileWriter;
use crate::error::{Result, VellumError};
use crate::format::codec::encode_node;
use crate::format::key::KeyRange;
use crate::format::manifest::{
    encode_manifest, BtreeRoot, Manifest, Version, MANIFEST_KEY,
};
use crate::format::node::{
    interior_entry_size, leaf_entry_size, InteriorEntry, LeafEntry, LeafValue, Node, SubtreeStats,
};
use crate::kvstore::{StorageGeneration, WriteOutcome};
use crate::tree::read::child_covered_range;
use crate::tree::{check_height, history, TreeIo};

/// Publish attempts before a commit gives up with `CommitConflict`.
pub const MAX_COMMIT_ATTEMPTS: u32 = 64;

const BACKOFF_CAP: Duration = Duration::from_millis(100);

/// Applies `batch` on top of the latest version, publishing a new one.
///
/// Returns the manifest as published together with the committed version.
pub(crate) async fn commit_batch(
    io: &TreeIo,
    constraints: &ConfigConstraints,
    batch: &MutationBatch,
) -> Result<(Manifest, Version)> {
    if batch.is_empty() {
        return Err(VellumError::InvalidArgument(
            "cannot commit an empty batch".into(),
        ));
    }
    let normalized = batch.normalize();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match try_commit(io, constraints, &normalized).await {
            Ok(Some(committed)) => return Ok(committed),
            Ok(None) => {
                debug!(attempts, "commit.conflict");
            }
            Err(e) if e.is_retriable() && attempts < MAX_COMMIT_ATTEMPTS => {
                debug!(attempts, error = %e, "commit.retry");
            }
            Err(e) => return Err(e),
        }
        if attempts >= MAX_COMMIT_ATTEMPTS {
            return Err(VellumError::CommitConflict { attempts });
        }
        backoff(attempts).await;
    }
}

/// One publish attempt; `Ok(None)` means the manifest moved underneath us.
async fn try_commit(
    io: &TreeIo,
    constraints: &ConfigConstraints,
    batch: &NormalizedBatch,
) -> Result<Option<(Manifest, Version)>> {
    let (mut manifest, expected) = match io.load_manifest().await? {
        Some((manifest, token)) => {
            constraints.matches(&manifest.config)?;
            (manifest, token)
        }
        // First writer bootstraps the empty generation-1 manifest and
        // publishes it together with its own version, expecting absence.
        None => (
            Manifest::bootstrap(constraints.create()?, now_millis()),
            StorageGeneration::none(),
        ),
    };
    let writer = DataFileWriter::new(Arc::clone(&io.base), io.limits.clone());
    let ctx = CommitCtx {
        io,
        config: manifest.config,
        batch,
        writer: &writer,
    };

    let prior_root = manifest.latest_version().root;
    let mut level = match prior_root {
        Some(root) => {
            let root_entry = InteriorEntry {
                inclusive_min: Bytes::new(),
                child: root.location,
                stats: root.stats,
            };
            apply_subtree(&ctx, root_entry, KeyRange::all(), root.height).await?
        }
        None => build_fresh(&ctx)?,
    };
    let mut height = prior_root.map_or(0, |r| r.height);
    while level.len() > 1 {
        height = height
            .checked_add(1)
            .ok_or(VellumError::Corruption("tree height overflow"))?;
        level = build_interior_nodes(&ctx, level, height)?;
    }
    let root = match level.pop() {
        None => None,
        Some(built) => Some(collapse_root(&ctx, built).await?),
    };

    let version = Version {
        generation: manifest.generation() + 1,
        commit_time_millis: now_millis(),
        root,
    };
    history::append_version(&mut manifest, version, &writer)?;
    writer.flush().await?;

    let encoded = encode_manifest(&manifest)?;
    let outcome = {
        let _permit = io.limits.acquire().await;
        io.base
            .conditional_write(MANIFEST_KEY, Some(Bytes::from(encoded)), &expected)
            .await?
    };
    match outcome {
        WriteOutcome::Committed(_) => {
            info!(
                generation = version.generation,
                keys = root.map_or(0, |r| r.stats.num_keys),
                "commit.publish"
            );
            Ok(Some((manifest, version)))
        }
        WriteOutcome::GenerationMismatch => Ok(None),
    }
}

struct CommitCtx<'a> {
    io: &'a TreeIo,
    config: Config,
    batch: &'a NormalizedBatch,
    writer: &'a DataFileWriter,
}

/// A node produced (or kept) by the rebuild, as seen from its parent.
struct Built {
    entry: InteriorEntry,
    /// Height of the node `entry.child` points to.
    height: u8,
    /// Entry count when freshly built this commit; `None` for a kept prior
    /// node, whose encoding is already durable and can be refetched.
    fresh_entry_count: Option<usize>,
    /// The single entry's own subtree, kept when a fresh interior node has
    /// exactly one entry so a redundant root collapses without refetching.
    sole_child: Option<Box<Built>>,
}

impl Built {
    fn kept(entry: InteriorEntry, height: u8) -> Self {
        Built {
            entry,
            height,
            fresh_entry_count: None,
            sole_child: None,
        }
    }
}

/// Resolves the root candidate, descending while it is an interior node
/// with a single child. Fresh single-entry nodes carry their child in
/// memory; kept prior nodes are fetched from their durable encoding.
async fn collapse_root(ctx: &CommitCtx<'_>, mut built: Built) -> Result<BtreeRoot> {
    while built.height > 0 {
        match built.fresh_entry_count {
            Some(1) => {
                let Some(child) = built.sole_child.take() else {
                    return Err(VellumError::Corruption("single-entry node lost its child"));
                };
                built = *child;
            }
            Some(_) => break,
            None => {
                let node = ctx.io.fetch_node(&ctx.config, built.entry.child).await?;
                check_height(&node, built.height)?;
                let Node::Interior { entries, .. } = node else {
                    return Err(VellumError::Corruption("expected interior node"));
                };
                if entries.len() != 1 {
                    break;
                }
                let entry = entries.into_iter().next().ok_or(VellumError::Corruption(
                    "interior node with no entries",
                ))?;
                built = Built::kept(entry, built.height - 1);
            }
        }
    }
    Ok(BtreeRoot {
        location: built.entry.child,
        height: built.height,
        stats: built.entry.stats,
    })
}

type SubtreeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Built>>> + Send + 'a>>;

/// Rebuilds the subtree under `prior`, returning its replacement entries.
///
/// The result is empty when the batch deletes the whole subtree, one entry
/// when it fits a single node, and several when it splits.
fn apply_subtree<'a>(
    ctx: &'a CommitCtx<'a>,
    prior: InteriorEntry,
    covered: KeyRange,
    height: u8,
) -> SubtreeFuture<'a> {
    Box::pin(async move {
        if ctx.batch.skips(&covered) {
            return Ok(vec![Built::kept(prior, height)]);
        }
        if ctx.batch.fully_deletes(&covered) && !ctx.batch.has_put_in(&covered) {
            return Ok(Vec::new());
        }
        if height == 0 {
            return apply_leaf(ctx, prior, covered).await;
        }

        let node = ctx.io.fetch_node(&ctx.config, prior.child).await?;
        check_height(&node, height)?;
        let Node::Interior { entries, .. } = node else {
            return Err(VellumError::Corruption("expected interior node"));
        };

        let (children, any_changed) = if height == 1 {
            rebuild_leaf_level(ctx, &entries, &covered).await?
        } else {
            let mut children = Vec::new();
            let mut any_changed = false;
            for i in 0..entries.len() {
                let child_range = child_covered_range(&entries, i, &covered);
                let child_prior = entries[i].clone();
                let results =
                    apply_subtree(ctx, child_prior.clone(), child_range, height - 1).await?;
                if !(results.len() == 1 && results[0].entry == child_prior) {
                    any_changed = true;
                }
                children.extend(results);
            }
            (children, any_changed)
        };
        if !any_changed {
            return Ok(vec![Built::kept(prior, height)]);
        }
        if children.is_empty() {
            return Ok(Vec::new());
        }
        build_interior_nodes(ctx, children, height)
    })
}

/// One leaf-level child mid-rebuild: kept by reference, or its merged
/// entries awaiting re-packing.
enum LeafChild {
    Kept(InteriorEntry),
    Fresh(Vec<LeafEntry>),
}

/// Rebuilds the children of a height-1 node.
///
/// Skipped and content-identical leaves stay by reference; runs of
/// consecutive rebuilt leaves are concatenated before chunking so deletions
/// do not strand undersized single-key leaves.
async fn rebuild_leaf_level(
    ctx: &CommitCtx<'_>,
    entries: &[InteriorEntry],
    covered: &KeyRange,
) -> Result<(Vec<Built>, bool)> {
    let mut children = Vec::with_capacity(entries.len());
    let mut any_changed = false;
    for i in 0..entries.len() {
        let child_range = child_covered_range(entries, i, covered);
        if ctx.batch.skips(&child_range) {
            children.push(LeafChild::Kept(entries[i].clone()));
            continue;
        }
        if ctx.batch.fully_deletes(&child_range) && !ctx.batch.has_put_in(&child_range) {
            any_changed = true;
            children.push(LeafChild::Fresh(Vec::new()));
            continue;
        }
        let node = ctx.io.fetch_node(&ctx.config, entries[i].child).await?;
        check_height(&node, 0)?;
        let Node::Leaf {
            entries: prior_entries,
        } = node
        else {
            return Err(VellumError::Corruption("expected leaf node"));
        };
        let merged = merge_leaf_entries(ctx, &prior_entries, &child_range);
        if merged == prior_entries {
            children.push(LeafChild::Kept(entries[i].clone()));
        } else {
            any_changed = true;
            children.push(LeafChild::Fresh(merged));
        }
    }

    let mut out = Vec::new();
    let mut run: Vec<LeafEntry> = Vec::new();
    for child in children {
        match child {
            LeafChild::Kept(entry) => {
                if !run.is_empty() {
                    out.extend(build_leaf_nodes(ctx, std::mem::take(&mut run))?);
                }
                out.push(Built::kept(entry, 0));
            }
            LeafChild::Fresh(entries) => run.extend(entries),
        }
    }
    if !run.is_empty() {
        out.extend(build_leaf_nodes(ctx, run)?);
    }
    Ok((out, any_changed))
}

/// Rebuilds a leaf that is itself the root.
async fn apply_leaf(
    ctx: &CommitCtx<'_>,
    prior: InteriorEntry,
    covered: KeyRange,
) -> Result<Vec<Built>> {
    let node = ctx.io.fetch_node(&ctx.config, prior.child).await?;
    check_height(&node, 0)?;
    let Node::Leaf { entries } = node else {
        return Err(VellumError::Corruption("expected leaf node"));
    };
    let merged = merge_leaf_entries(ctx, &entries, &covered);
    if merged == entries {
        return Ok(vec![Built::kept(prior, 0)]);
    }
    if merged.is_empty() {
        return Ok(Vec::new());
    }
    build_leaf_nodes(ctx, merged)
}

/// Merge-joins a leaf's entries with the batch operations inside `covered`.
fn merge_leaf_entries(
    ctx: &CommitCtx<'_>,
    entries: &[LeafEntry],
    covered: &KeyRange,
) -> Vec<LeafEntry> {
    // Delete ranges apply first, then point ops override key by key.
    let mut merged = Vec::new();
    let mut points = ctx.batch.points_in(covered).peekable();
    for entry in entries {
        while let Some(&(key, value)) = points.peek() {
            if key >= &entry.key[..] {
                break;
            }
            if let Some(value) = value {
                merged.push(make_leaf_entry(ctx, key, value));
            }
            points.next();
        }
        if let Some(&(key, value)) = points.peek() {
            if key == &entry.key[..] {
                if let Some(value) = value {
                    merged.push(make_leaf_entry(ctx, key, value));
                }
                points.next();
                continue;
            }
        }
        if ctx.batch.deletes_key(&entry.key) {
            continue;
        }
        merged.push(entry.clone());
    }
    for (key, value) in points {
        if let Some(value) = value {
            merged.push(make_leaf_entry(ctx, key, value));
        }
    }
    merged
}

/// Leaves for a store with no prior root; nothing to fetch or delete.
fn build_fresh(ctx: &CommitCtx<'_>) -> Result<Vec<Built>> {
    let mut entries = Vec::new();
    for (key, value) in ctx.batch.points_in(&KeyRange::all()) {
        if let Some(value) = value {
            entries.push(make_leaf_entry(ctx, key, value));
        }
    }
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    build_leaf_nodes(ctx, entries)
}

fn make_leaf_entry(ctx: &CommitCtx<'_>, key: &[u8], value: &Bytes) -> LeafEntry {
    let value = if value.len() <= ctx.config.max_inline_value_bytes as usize {
        LeafValue::Inline(value.clone())
    } else {
        LeafValue::OutOfLine(ctx.writer.write(value))
    };
    LeafEntry {
        key: Bytes::copy_from_slice(key),
        value,
    }
}

fn build_leaf_nodes(ctx: &CommitCtx<'_>, entries: Vec<LeafEntry>) -> Result<Vec<Built>> {
    let chunks = chunk_by_size(
        entries,
        leaf_entry_size,
        ctx.config.max_decoded_node_bytes as u64,
        1,
    );
    let mut out = Vec::with_capacity(chunks.len());
    for entries in chunks {
        let inclusive_min = entries[0].key.clone();
        let stats = SubtreeStats {
            num_keys: entries.len() as u64,
            total_bytes: entries
                .iter()
                .map(|e| e.key.len() as u64 + e.value.value_len())
                .sum(),
        };
        let count = entries.len();
        let encoded = encode_node(&Node::Leaf { entries }, ctx.config.compression)?;
        let child = ctx.writer.write(&encoded);
        out.push(Built {
            entry: InteriorEntry {
                inclusive_min,
                child,
                stats,
            },
            height: 0,
            fresh_entry_count: Some(count),
            sole_child: None,
        });
    }
    Ok(out)
}

fn build_interior_nodes(ctx: &CommitCtx<'_>, children: Vec<Built>, height: u8) -> Result<Vec<Built>> {
    // At least two entries per interior node, so each added level strictly
    // shrinks even when the budget is below a single entry's size.
    let chunks = chunk_by_size(
        children,
        |b| interior_entry_size(&b.entry),
        ctx.config.max_decoded_node_bytes as u64,
        2,
    );
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let entries: Vec<InteriorEntry> = chunk.iter().map(|b| b.entry.clone()).collect();
        let inclusive_min = entries[0].inclusive_min.clone();
        let stats = entries
            .iter()
            .fold(SubtreeStats::default(), |acc, e| acc.merge(e.stats));
        let encoded = encode_node(
            &Node::Interior {
                height,
                entries,
            },
            ctx.config.compression,
        )?;
        let child = ctx.writer.write(&encoded);
        let count = chunk.len();
        let sole_child = if count == 1 {
            chunk.into_iter().next().map(Box::new)
        } else {
            None
        };
        out.push(Built {
            entry: InteriorEntry {
                inclusive_min,
                child,
                stats,
            },
            height,
            fresh_entry_count: Some(count),
            sole_child,
        });
    }
    Ok(out)
}

/// Greedy split of ordered entries into chunks under the node budget; every
/// chunk holds at least `min_per_chunk` entries even when oversized.
fn chunk_by_size<T>(
    items: Vec<T>,
    size: impl Fn(&T) -> u64,
    budget: u64,
    min_per_chunk: usize,
) -> Vec<Vec<T>> {
    let mut chunks = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_size = 0u64;
    for item in items {
        let item_size = size(&item);
        if current.len() >= min_per_chunk && current_size + item_size > budget {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += item_size;
        current.push(item);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

async fn backoff(attempt: u32) {
    let base = Duration::from_millis(1u64 << attempt.min(7));
    let cap = base.min(BACKOFF_CAP).as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=cap);
    tokio::time::sleep(Duration::from_millis(jitter.max(1))).await;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
