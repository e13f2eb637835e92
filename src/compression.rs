//! Pluggable compression for node payloads.
//!
//! The engine consumes compression purely through [`Compressor`]; the
//! negotiated [`Compression`] selection is part of the store config and is
//! recorded in every encoded node so decode can reject a foreign codec.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, VellumError};

/// Store-wide compression selection, fixed at config commit.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum Compression {
    /// Payloads stored verbatim.
    None,
    /// Snappy raw-format compression.
    #[default]
    Snappy,
}

impl Compression {
    /// Byte tag recorded in encoded nodes.
    pub fn wire_id(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Snappy => 1,
        }
    }

    /// Inverse of [`Compression::wire_id`].
    pub fn from_wire_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Snappy),
            _ => Err(VellumError::Corruption("unknown compression id")),
        }
    }

    /// The codec implementing this selection.
    pub fn compressor(self) -> &'static dyn Compressor {
        match self {
            Compression::None => &Identity,
            Compression::Snappy => &Snappy,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => f.write_str("none"),
            Compression::Snappy => f.write_str("snappy"),
        }
    }
}

/// Encode/decode capability consumed by the node codec.
///
/// `encode` must be deterministic: identical input produces identical
/// output, a requirement of the unchanged-subtree reuse optimization.
pub trait Compressor: Send + Sync {
    /// Compresses `src`.
    fn encode(&self, src: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `src`, refusing outputs larger than `size_limit`.
    fn decode(&self, src: &[u8], size_limit: usize) -> Result<Vec<u8>>;
}

/// The "none" codec: bytes pass through untouched.
#[derive(Debug)]
pub struct Identity;

impl Compressor for Identity {
    fn encode(&self, src: &[u8]) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }

    fn decode(&self, src: &[u8], size_limit: usize) -> Result<Vec<u8>> {
        if src.len() > size_limit {
            return Err(VellumError::Corruption("decoded node exceeds size limit"));
        }
        Ok(src.to_vec())
    }
}

/// Snappy raw-format codec.
#[derive(Debug)]
pub struct Snappy;

impl Compressor for Snappy {
    fn encode(&self, src: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(src)
            .map_err(|_| VellumError::Corruption("snappy compression failed"))
    }

    fn decode(&self, src: &[u8], size_limit: usize) -> Result<Vec<u8>> {
        // The raw format states the decompressed length up front; check it
        // before allocating anything.
        let decoded_len = snap::raw::decompress_len(src)
            .map_err(|_| VellumError::Corruption("snappy header malformed"))?;
        if decoded_len > size_limit {
            return Err(VellumError::Corruption("decoded node exceeds size limit"));
        }
        snap::raw::Decoder::new()
            .decompress_vec(src)
            .map_err(|_| VellumError::Corruption("snappy payload malformed"))
    }
}
