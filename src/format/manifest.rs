//! The manifest record: the single atomically-updated root of the store.
//!
//! The manifest names the committed config, the most recent versions inline,
//! and references to out-of-line version-tree nodes covering older
//! generations. It lives at a well-known base-store key and is only ever
//! replaced through a conditional write.

use crate::compression::Compression;
use crate::config::{Config, StoreUuid, MAX_VERSION_TREE_ARITY_LOG2};
use crate::error::{Result, VellumError};
use crate::format::codec::{decode_ref, encode_ref};
use crate::format::node::{IndirectDataReference, SubtreeStats};
use crate::format::varint;

/// Base-store key of the manifest record.
pub const MANIFEST_KEY: &str = "manifest";

/// Magic prefix of the encoded manifest.
pub const MANIFEST_MAGIC: [u8; 4] = *b"vMAN";
/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u8 = 1;

const CRC_LEN: usize = 4;

/// Reference to the root B-tree node of one committed version.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BtreeRoot {
    /// Location of the encoded root node.
    pub location: IndirectDataReference,
    /// Height of the root node.
    pub height: u8,
    /// Statistics for the whole tree.
    pub stats: SubtreeStats,
}

/// One committed version: generation, commit timestamp, and root.
///
/// `root` is `None` for versions whose tree is empty (including the
/// bootstrap generation 1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Version {
    /// Monotonic generation number; never reused.
    pub generation: u64,
    /// Commit wall-clock time, unix milliseconds.
    pub commit_time_millis: u64,
    /// Root of the committed tree, absent when empty.
    pub root: Option<BtreeRoot>,
}

/// Manifest reference to an out-of-line version-tree node.
///
/// A node of height `h` covers the aligned generation block
/// `[last_generation - B^h + 1, last_generation]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VersionNodeRef {
    /// Location of the encoded version-tree node.
    pub location: IndirectDataReference,
    /// Height of the node (1 = leaf of Versions).
    pub height: u8,
    /// Largest generation covered.
    pub last_generation: u64,
}

impl VersionNodeRef {
    /// Number of generations a node of this height covers under arity `B`.
    pub fn span(&self, arity_log2: u8) -> u64 {
        1u64 << (arity_log2 as u32 * self.height as u32)
    }

    /// Smallest generation covered.
    pub fn first_generation(&self, arity_log2: u8) -> u64 {
        self.last_generation - self.span(arity_log2) + 1
    }
}

/// The decoded manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    /// Negotiated store configuration.
    pub config: Config,
    /// Recent versions, ascending and consecutive; last entry is latest.
    pub versions: Vec<Version>,
    /// Out-of-line version-tree nodes, ascending by covered range.
    pub version_nodes: Vec<VersionNodeRef>,
}

impl Manifest {
    /// Fresh manifest for an empty store: generation 1, no root.
    pub fn bootstrap(config: Config, commit_time_millis: u64) -> Self {
        Manifest {
            config,
            versions: vec![Version {
                generation: 1,
                commit_time_millis,
                root: None,
            }],
            version_nodes: Vec::new(),
        }
    }

    /// The most recently committed version.
    pub fn latest_version(&self) -> &Version {
        self.versions.last().expect("manifest has no versions")
    }

    /// Generation of the latest version.
    pub fn generation(&self) -> u64 {
        self.latest_version().generation
    }
}

pub(crate) fn encode_version(version: &Version, out: &mut Vec<u8>) {
    varint::encode_u64(version.generation, out);
    varint::encode_u64(version.commit_time_millis, out);
    match &version.root {
        None => out.push(0),
        Some(root) => {
            out.push(1);
            encode_ref(&root.location, out);
            out.push(root.height);
            varint::encode_u64(root.stats.num_keys, out);
            varint::encode_u64(root.stats.total_bytes, out);
        }
    }
}

pub(crate) fn decode_version(src: &[u8], off: &mut usize) -> Result<Version> {
    let generation = varint::decode_u64(src, off)?;
    if generation == 0 {
        return Err(VellumError::Corruption("version with generation zero"));
    }
    let commit_time_millis = varint::decode_u64(src, off)?;
    let tag = *src
        .get(*off)
        .ok_or(VellumError::Corruption("version root tag missing"))?;
    *off += 1;
    let root = match tag {
        0 => None,
        1 => {
            let location = decode_ref(src, off)?;
            let height = *src
                .get(*off)
                .ok_or(VellumError::Corruption("root height missing"))?;
            *off += 1;
            let num_keys = varint::decode_u64(src, off)?;
            let total_bytes = varint::decode_u64(src, off)?;
            Some(BtreeRoot {
                location,
                height,
                stats: SubtreeStats {
                    num_keys,
                    total_bytes,
                },
            })
        }
        _ => return Err(VellumError::Corruption("unknown version root tag")),
    };
    Ok(Version {
        generation,
        commit_time_millis,
        root,
    })
}

fn arity_log2_bits(config: &Config) -> u32 {
    config.version_tree_arity_log2 as u32
}

fn encode_config(config: &Config, out: &mut Vec<u8>) {
    out.extend_from_slice(&config.uuid.0);
    out.push(config.compression.wire_id());
    out.extend_from_slice(&config.max_decoded_node_bytes.to_be_bytes());
    out.extend_from_slice(&config.max_inline_value_bytes.to_be_bytes());
    out.push(config.version_tree_arity_log2);
}

fn decode_config(src: &[u8], off: &mut usize) -> Result<Config> {
    let uuid: [u8; 16] = varint::take(src, off, 16)?
        .try_into()
        .map_err(|_| VellumError::Corruption("config uuid truncated"))?;
    let compression = Compression::from_wire_id(*src.get(*off).ok_or(VellumError::Corruption(
        "config compression id missing",
    ))?)?;
    *off += 1;
    let max_decoded_node_bytes = u32::from_be_bytes(
        varint::take(src, off, 4)?
            .try_into()
            .expect("slice length checked"),
    );
    let max_inline_value_bytes = u32::from_be_bytes(
        varint::take(src, off, 4)?
            .try_into()
            .expect("slice length checked"),
    );
    let version_tree_arity_log2 = *src
        .get(*off)
        .ok_or(VellumError::Corruption("config arity missing"))?;
    *off += 1;
    if version_tree_arity_log2 == 0 || version_tree_arity_log2 > MAX_VERSION_TREE_ARITY_LOG2 {
        return Err(VellumError::Corruption("config arity out of range"));
    }
    Ok(Config {
        uuid: StoreUuid(uuid),
        compression,
        max_decoded_node_bytes,
        max_inline_value_bytes,
        version_tree_arity_log2,
    })
}

/// Serializes the manifest.
pub fn encode_manifest(manifest: &Manifest) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&MANIFEST_MAGIC);
    out.push(MANIFEST_FORMAT_VERSION);
    encode_config(&manifest.config, &mut out);
    varint::encode_u64(manifest.versions.len() as u64, &mut out);
    for version in &manifest.versions {
        encode_version(version, &mut out);
    }
    varint::encode_u64(manifest.version_nodes.len() as u64, &mut out);
    for node in &manifest.version_nodes {
        encode_ref(&node.location, &mut out);
        out.push(node.height);
        varint::encode_u64(node.last_generation, &mut out);
    }
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Verifies and parses an encoded manifest.
pub fn decode_manifest(bytes: &[u8]) -> Result<Manifest> {
    if bytes.len() < MANIFEST_MAGIC.len() + 1 + CRC_LEN {
        return Err(VellumError::Corruption("manifest shorter than header"));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
    let stored_crc = u32::from_be_bytes(
        crc_bytes
            .try_into()
            .map_err(|_| VellumError::Corruption("manifest checksum truncated"))?,
    );
    if crc32fast::hash(body) != stored_crc {
        return Err(VellumError::Corruption("manifest checksum mismatch"));
    }
    if body[..4] != MANIFEST_MAGIC {
        return Err(VellumError::Corruption("bad manifest magic"));
    }
    if body[4] != MANIFEST_FORMAT_VERSION {
        return Err(VellumError::Corruption("unsupported manifest version"));
    }
    let mut off = 5;
    let config = decode_config(body, &mut off)?;
    let version_count = varint::decode_len(body, &mut off)?;
    if version_count == 0 {
        return Err(VellumError::Corruption("manifest lists no versions"));
    }
    let mut versions = Vec::with_capacity(version_count);
    for _ in 0..version_count {
        versions.push(decode_version(body, &mut off)?);
    }
    if !versions
        .windows(2)
        .all(|w| w[1].generation == w[0].generation + 1)
    {
        return Err(VellumError::Corruption(
            "manifest versions not consecutive",
        ));
    }
    let node_count = varint::decode_len(body, &mut off)?;
    let mut version_nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let location = decode_ref(body, &mut off)?;
        let height = *body
            .get(off)
            .ok_or(VellumError::Corruption("version node height missing"))?;
        off += 1;
        if height == 0 {
            return Err(VellumError::Corruption("version node at height zero"));
        }
        let last_generation = varint::decode_u64(body, &mut off)?;
        let node = VersionNodeRef {
            location,
            height,
            last_generation,
        };
        if (height as u32) * (arity_log2_bits(&config)) >= 64
            || node.span(config.version_tree_arity_log2) > last_generation
        {
            return Err(VellumError::Corruption("version node range out of bounds"));
        }
        version_nodes.push(node);
    }
    if off != body.len() {
        return Err(VellumError::Corruption("trailing bytes after manifest"));
    }
    let arity_log2 = config.version_tree_arity_log2;
    let disjoint = version_nodes
        .windows(2)
        .all(|w| w[0].last_generation < w[1].first_generation(arity_log2));
    let below_inline = version_nodes
        .last()
        .map_or(true, |n| n.last_generation < versions[0].generation);
    if !disjoint || !below_inline {
        return Err(VellumError::Corruption("version nodes overlap"));
    }
    Ok(Manifest {
        config,
        versions,
        version_nodes,
    })
}
