//! Encoded nodes of the version history index.
//!
//! Version-tree nodes are immutable blobs in data files, sharing the node
//! codec's envelope (magic, compression id, CRC32). A height-1 leaf holds a
//! block of consecutive [`Version`]s; an interior node at height `h` holds
//! references to height `h-1` children.

use crate::compression::Compression;
use crate::config::Config;
use crate::error::{Result, VellumError};
use crate::format::codec::{decode_ref, decode_size_limit, encode_ref};
use crate::format::manifest::{decode_version, encode_version, Version, VersionNodeRef};
use crate::format::varint;

/// Magic prefix of encoded version-tree nodes.
pub const VERSION_NODE_MAGIC: [u8; 4] = *b"vVTn";
/// Current version-tree node format version.
pub const VERSION_NODE_FORMAT_VERSION: u8 = 1;

const KIND_LEAF: u8 = 0;
const KIND_INTERIOR: u8 = 1;
const HEADER_LEN: usize = 6;
const CRC_LEN: usize = 4;

/// A decoded version-tree node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionTreeNode {
    /// Height-1 node holding consecutive versions.
    Leaf {
        /// Ascending, consecutive generations.
        versions: Vec<Version>,
    },
    /// Height ≥ 2 node routing to children one level down.
    Interior {
        /// Height of this node.
        height: u8,
        /// Ordered, disjoint child references at `height - 1`.
        children: Vec<VersionNodeRef>,
    },
}

impl VersionTreeNode {
    /// Height of the node.
    pub fn height(&self) -> u8 {
        match self {
            VersionTreeNode::Leaf { .. } => 1,
            VersionTreeNode::Interior { height, .. } => *height,
        }
    }

    /// Largest generation reachable through this node.
    pub fn last_generation(&self) -> u64 {
        match self {
            VersionTreeNode::Leaf { versions } => {
                versions.last().map_or(0, |v| v.generation)
            }
            VersionTreeNode::Interior { children, .. } => {
                children.last().map_or(0, |c| c.last_generation)
            }
        }
    }
}

/// Serializes a version-tree node under the configured compression.
pub fn encode_version_tree_node(
    node: &VersionTreeNode,
    compression: Compression,
) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    match node {
        VersionTreeNode::Leaf { versions } => {
            payload.push(KIND_LEAF);
            payload.push(1);
            varint::encode_u64(versions.len() as u64, &mut payload);
            for version in versions {
                encode_version(version, &mut payload);
            }
        }
        VersionTreeNode::Interior { height, children } => {
            payload.push(KIND_INTERIOR);
            payload.push(*height);
            varint::encode_u64(children.len() as u64, &mut payload);
            for child in children {
                encode_ref(&child.location, &mut payload);
                varint::encode_u64(child.last_generation, &mut payload);
            }
        }
    }
    let compressed = compression.compressor().encode(&payload)?;
    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len() + CRC_LEN);
    out.extend_from_slice(&VERSION_NODE_MAGIC);
    out.push(VERSION_NODE_FORMAT_VERSION);
    out.push(compression.wire_id());
    out.extend_from_slice(&compressed);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Verifies and parses an encoded version-tree node.
pub fn decode_version_tree_node(bytes: &[u8], config: &Config) -> Result<VersionTreeNode> {
    if bytes.len() < HEADER_LEN + CRC_LEN {
        return Err(VellumError::Corruption(
            "version node shorter than header",
        ));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
    let stored_crc = u32::from_be_bytes(
        crc_bytes
            .try_into()
            .map_err(|_| VellumError::Corruption("version node checksum truncated"))?,
    );
    if crc32fast::hash(body) != stored_crc {
        return Err(VellumError::Corruption("version node checksum mismatch"));
    }
    if body[..4] != VERSION_NODE_MAGIC {
        return Err(VellumError::Corruption("bad version node magic"));
    }
    if body[4] != VERSION_NODE_FORMAT_VERSION {
        return Err(VellumError::Corruption(
            "unsupported version node format",
        ));
    }
    let compression = Compression::from_wire_id(body[5])?;
    if compression != config.compression {
        return Err(VellumError::Corruption(
            "version node compression differs from config",
        ));
    }
    let payload = compression
        .compressor()
        .decode(&body[HEADER_LEN..], decode_size_limit(config))?;
    let mut off = 0;
    let kind = *payload
        .get(off)
        .ok_or(VellumError::Corruption("version node payload empty"))?;
    off += 1;
    let height = *payload
        .get(off)
        .ok_or(VellumError::Corruption("version node height missing"))?;
    off += 1;
    let count = varint::decode_len(&payload, &mut off)?;
    if count == 0 {
        return Err(VellumError::Corruption("version node has no entries"));
    }
    let node = match kind {
        KIND_LEAF => {
            if height != 1 {
                return Err(VellumError::Corruption("version leaf at wrong height"));
            }
            let mut versions = Vec::with_capacity(count);
            for _ in 0..count {
                versions.push(decode_version(&payload, &mut off)?);
            }
            if !versions
                .windows(2)
                .all(|w| w[1].generation == w[0].generation + 1)
            {
                return Err(VellumError::Corruption(
                    "version leaf generations not consecutive",
                ));
            }
            VersionTreeNode::Leaf { versions }
        }
        KIND_INTERIOR => {
            if height < 2 {
                return Err(VellumError::Corruption(
                    "interior version node below height two",
                ));
            }
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                let location = decode_ref(&payload, &mut off)?;
                let last_generation = varint::decode_u64(&payload, &mut off)?;
                children.push(VersionNodeRef {
                    location,
                    height: height - 1,
                    last_generation,
                });
            }
            let arity = config.version_tree_arity_log2;
            if !children
                .windows(2)
                .all(|w| w[0].last_generation < w[1].first_generation(arity))
            {
                return Err(VellumError::Corruption(
                    "version node children overlap",
                ));
            }
            VersionTreeNode::Interior { height, children }
        }
        _ => return Err(VellumError::Corruption("unknown version node kind")),
    };
    if off != payload.len() {
        return Err(VellumError::Corruption(
            "trailing bytes after version node",
        ));
    }
    Ok(node)
}
