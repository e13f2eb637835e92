//! Maintenance and traversal of the version history index.
//!
//! The manifest keeps the newest generations inline. Older generations live
//! in out-of-line version-tree nodes: whenever more than `B` versions are
//! inline, the oldest aligned block of `B` is written as a height-1 leaf,
//! and `B` contiguous same-height nodes merge into one node a level up. The
//! result is a skip index with at most `B - 1` references per height.

use tracing::debug;

use crate::datafile::DataFileWriter;
use crate::error::{Result, VellumError};
use crate::format::manifest::{Manifest, Version, VersionNodeRef};
use crate::format::version_tree::{
    decode_version_tree_node, encode_version_tree_node, VersionTreeNode,
};
use crate::tree::TreeIo;

/// Appends `version` to the manifest, spilling and merging version-tree
/// nodes through `writer` as blocks fill up.
///
/// Encoded nodes are only buffered here; the caller flushes the writer
/// before publishing the manifest.
pub(crate) fn append_version(
    manifest: &mut Manifest,
    version: Version,
    writer: &DataFileWriter,
) -> Result<()> {
    debug_assert_eq!(version.generation, manifest.generation() + 1);
    manifest.versions.push(version);

    let config = manifest.config;
    let arity_log2 = config.version_tree_arity_log2 as u32;
    let b = 1usize << arity_log2;

    while manifest.versions.len() > b {
        // versions[0] always starts an aligned block, so the oldest `b`
        // inline versions form exactly one full height-1 leaf.
        let block: Vec<Version> = manifest.versions.drain(..b).collect();
        let last_generation = block[b - 1].generation;
        let encoded = encode_version_tree_node(
            &VersionTreeNode::Leaf { versions: block },
            config.compression,
        )?;
        let location = writer.write(&encoded);
        debug!(last_generation, "history.spill");
        manifest.version_nodes.push(VersionNodeRef {
            location,
            height: 1,
            last_generation,
        });

        // Merge full blocks of siblings upward as far as they go.
        loop {
            let n = manifest.version_nodes.len();
            if n < b {
                break;
            }
            let tail = &manifest.version_nodes[n - b..];
            let height = tail[0].height;
            if !tail.iter().all(|r| r.height == height) {
                break;
            }
            if (height as u32 + 1) * arity_log2 >= 64 {
                break;
            }
            let merged_span = 1u64 << (arity_log2 * (height as u32 + 1));
            let last = tail[b - 1].last_generation;
            if last % merged_span != 0 {
                break;
            }
            if !tail
                .windows(2)
                .all(|w| w[0].last_generation + 1 == w[1].first_generation(config.version_tree_arity_log2))
            {
                break;
            }
            let encoded = encode_version_tree_node(
                &VersionTreeNode::Interior {
                    height: height + 1,
                    children: tail.to_vec(),
                },
                config.compression,
            )?;
            let location = writer.write(&encoded);
            debug!(height = height + 1, last_generation = last, "history.merge");
            manifest.version_nodes.truncate(n - b);
            manifest.version_nodes.push(VersionNodeRef {
                location,
                height: height + 1,
                last_generation: last,
            });
        }
    }
    Ok(())
}

/// Looks up the [`Version`] committed as `generation`, descending the
/// version tree when it is no longer inline.
pub(crate) async fn resolve_generation(
    io: &TreeIo,
    manifest: &Manifest,
    generation: u64,
) -> Result<Version> {
    if generation == 0 || generation > manifest.generation() {
        return Err(VellumError::NotFound("generation"));
    }
    let first_inline = manifest.versions[0].generation;
    if generation >= first_inline {
        return Ok(manifest.versions[(generation - first_inline) as usize]);
    }
    let arity_log2 = manifest.config.version_tree_arity_log2;
    let idx = manifest
        .version_nodes
        .partition_point(|n| n.last_generation < generation);
    let Some(mut node_ref) = manifest.version_nodes.get(idx).copied() else {
        return Err(VellumError::NotFound("generation"));
    };
    if generation < node_ref.first_generation(arity_log2) {
        return Err(VellumError::NotFound("generation"));
    }
    loop {
        let bytes = io.data_reader().read(node_ref.location).await?;
        let node = decode_version_tree_node(&bytes, &manifest.config)?;
        if node.height() != node_ref.height {
            return Err(VellumError::Corruption("version node height mismatch"));
        }
        match node {
            VersionTreeNode::Leaf { versions } => {
                let first = versions[0].generation;
                return generation
                    .checked_sub(first)
                    .and_then(|i| versions.get(i as usize))
                    .copied()
                    .ok_or(VellumError::Corruption(
                        "generation missing from version leaf",
                    ));
            }
            VersionTreeNode::Interior { children, .. } => {
                let i = children.partition_point(|c| c.last_generation < generation);
                let Some(child) = children.get(i) else {
                    return Err(VellumError::Corruption(
                        "generation missing from version node",
                    ));
                };
                node_ref = *child;
            }
        }
    }
}
