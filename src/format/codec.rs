//! Canonical binary encoding of B-tree nodes.
//!
//! Layout: 4-byte magic, format-version byte, compression-id byte, the
//! compressed payload, then a big-endian CRC32 over everything preceding it.
//! Encoding is deterministic: logically identical nodes always produce
//! byte-identical output, which the commit engine relies on to detect
//! unchanged subtrees and keep their prior locations.

use bytes::Bytes;

use crate::compression::Compression;
use crate::config::Config;
use crate::error::{Result, VellumError};
use crate::format::key::MAX_KEY_LEN;
use crate::format::node::{
    DataFileId, IndirectDataReference, InteriorEntry, LeafEntry, LeafValue, Node, SubtreeStats,
};
use crate::format::varint;

/// Magic prefix of every encoded B-tree node.
pub const NODE_MAGIC: [u8; 4] = *b"vBTn";
/// Current node format version.
pub const NODE_FORMAT_VERSION: u8 = 1;

const KIND_LEAF: u8 = 0;
const KIND_INTERIOR: u8 = 1;
const VALUE_INLINE: u8 = 0;
const VALUE_OUT_OF_LINE: u8 = 1;

const HEADER_LEN: usize = 6;
const CRC_LEN: usize = 4;

/// Floor of the decompression bound.
///
/// `max_decoded_node_bytes` is an arity target, not a hard node bound: a
/// min-arity config (budget 0 or 1) still produces nodes holding one real
/// entry. The bomb guard therefore never drops below this floor, widened
/// further when the config permits large inline values.
const DECODE_LIMIT_FLOOR: usize = 1 << 20;

/// Upper bound applied to decompressed payloads for this config.
pub fn decode_size_limit(config: &Config) -> usize {
    let inline_headroom = (config.max_inline_value_bytes as usize).saturating_mul(2);
    (config.max_decoded_node_bytes as usize)
        .max(inline_headroom)
        .max(DECODE_LIMIT_FLOOR)
}

pub(crate) fn encode_ref(r: &IndirectDataReference, out: &mut Vec<u8>) {
    out.extend_from_slice(&r.file.0);
    varint::encode_u64(r.offset, out);
    varint::encode_u64(r.length, out);
}

pub(crate) fn decode_ref(src: &[u8], off: &mut usize) -> Result<IndirectDataReference> {
    let id: [u8; 16] = varint::take(src, off, 16)?
        .try_into()
        .map_err(|_| VellumError::Corruption("data file id truncated"))?;
    let offset = varint::decode_u64(src, off)?;
    let length = varint::decode_u64(src, off)?;
    offset
        .checked_add(length)
        .ok_or(VellumError::Corruption("indirect reference overflows file"))?;
    Ok(IndirectDataReference {
        file: DataFileId(id),
        offset,
        length,
    })
}

fn encode_key(key: &[u8], out: &mut Vec<u8>) {
    debug_assert!(key.len() <= MAX_KEY_LEN);
    varint::encode_u64(key.len() as u64, out);
    out.extend_from_slice(key);
}

fn decode_key(src: &[u8], off: &mut usize) -> Result<Bytes> {
    let len = varint::decode_len(src, off)?;
    if len > MAX_KEY_LEN {
        return Err(VellumError::Corruption("key length exceeds maximum"));
    }
    Ok(Bytes::copy_from_slice(varint::take(src, off, len)?))
}

fn encode_payload(node: &Node) -> Vec<u8> {
    let mut out = Vec::new();
    match node {
        Node::Leaf { entries } => {
            out.push(KIND_LEAF);
            out.push(0);
            varint::encode_u64(entries.len() as u64, &mut out);
            for entry in entries {
                encode_key(&entry.key, &mut out);
                match &entry.value {
                    LeafValue::Inline(value) => {
                        out.push(VALUE_INLINE);
                        varint::encode_u64(value.len() as u64, &mut out);
                        out.extend_from_slice(value);
                    }
                    LeafValue::OutOfLine(r) => {
                        out.push(VALUE_OUT_OF_LINE);
                        encode_ref(r, &mut out);
                    }
                }
            }
        }
        Node::Interior { height, entries } => {
            out.push(KIND_INTERIOR);
            out.push(*height);
            varint::encode_u64(entries.len() as u64, &mut out);
            for entry in entries {
                encode_key(&entry.inclusive_min, &mut out);
                encode_ref(&entry.child, &mut out);
                varint::encode_u64(entry.stats.num_keys, &mut out);
                varint::encode_u64(entry.stats.total_bytes, &mut out);
            }
        }
    }
    out
}

fn decode_payload(payload: &[u8]) -> Result<Node> {
    let mut off = 0;
    let kind = *payload
        .get(off)
        .ok_or(VellumError::Corruption("node payload empty"))?;
    off += 1;
    let height = *payload
        .get(off)
        .ok_or(VellumError::Corruption("node height missing"))?;
    off += 1;
    let count = varint::decode_len(payload, &mut off)?;
    if count == 0 {
        return Err(VellumError::Corruption("node has no entries"));
    }
    let node = match kind {
        KIND_LEAF => {
            if height != 0 {
                return Err(VellumError::Corruption("leaf node with nonzero height"));
            }
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let key = decode_key(payload, &mut off)?;
                let tag = *payload
                    .get(off)
                    .ok_or(VellumError::Corruption("leaf value tag missing"))?;
                off += 1;
                let value = match tag {
                    VALUE_INLINE => {
                        let len = varint::decode_len(payload, &mut off)?;
                        LeafValue::Inline(Bytes::copy_from_slice(varint::take(
                            payload, &mut off, len,
                        )?))
                    }
                    VALUE_OUT_OF_LINE => LeafValue::OutOfLine(decode_ref(payload, &mut off)?),
                    _ => return Err(VellumError::Corruption("unknown leaf value tag")),
                };
                entries.push(LeafEntry { key, value });
            }
            Node::Leaf { entries }
        }
        KIND_INTERIOR => {
            if height == 0 {
                return Err(VellumError::Corruption("interior node at height zero"));
            }
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let inclusive_min = decode_key(payload, &mut off)?;
                let child = decode_ref(payload, &mut off)?;
                let num_keys = varint::decode_u64(payload, &mut off)?;
                let total_bytes = varint::decode_u64(payload, &mut off)?;
                entries.push(InteriorEntry {
                    inclusive_min,
                    child,
                    stats: SubtreeStats {
                        num_keys,
                        total_bytes,
                    },
                });
            }
            Node::Interior { height, entries }
        }
        _ => return Err(VellumError::Corruption("unknown node kind")),
    };
    if off != payload.len() {
        return Err(VellumError::Corruption("trailing bytes after node entries"));
    }
    let keys_sorted = match &node {
        Node::Leaf { entries } => entries.windows(2).all(|w| w[0].key < w[1].key),
        Node::Interior { entries, .. } => entries
            .windows(2)
            .all(|w| w[0].inclusive_min < w[1].inclusive_min),
    };
    if !keys_sorted {
        return Err(VellumError::Corruption("node keys out of order"));
    }
    Ok(node)
}

/// Serializes a node under the given compression selection.
pub fn encode_node(node: &Node, compression: Compression) -> Result<Vec<u8>> {
    let payload = encode_payload(node);
    let compressed = compression.compressor().encode(&payload)?;
    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len() + CRC_LEN);
    out.extend_from_slice(&NODE_MAGIC);
    out.push(NODE_FORMAT_VERSION);
    out.push(compression.wire_id());
    out.extend_from_slice(&compressed);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Verifies, decompresses, and parses an encoded node.
pub fn decode_node(bytes: &[u8], config: &Config) -> Result<Node> {
    if bytes.len() < HEADER_LEN + CRC_LEN {
        return Err(VellumError::Corruption("encoded node shorter than header"));
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - CRC_LEN);
    let stored_crc = u32::from_be_bytes(
        crc_bytes
            .try_into()
            .map_err(|_| VellumError::Corruption("node checksum truncated"))?,
    );
    if crc32fast::hash(body) != stored_crc {
        return Err(VellumError::Corruption("node checksum mismatch"));
    }
    if body[..4] != NODE_MAGIC {
        return Err(VellumError::Corruption("bad node magic"));
    }
    if body[4] != NODE_FORMAT_VERSION {
        return Err(VellumError::Corruption("unsupported node format version"));
    }
    let compression = Compression::from_wire_id(body[5])?;
    if compression != config.compression {
        return Err(VellumError::Corruption("node compression differs from config"));
    }
    let payload = compression
        .compressor()
        .decode(&body[HEADER_LEN..], decode_size_limit(config))?;
    decode_payload(&payload)
}
