//! Unsigned LEB128 varints over untrusted input.
//!
//! Unlike in-heap encoders, everything here decodes bytes read from the base
//! store, so truncation and overlong encodings surface as `Corruption`
//! rather than panics.

use crate::error::{Result, VellumError};

/// Appends `v` as an unsigned LEB128 varint.
pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Decodes an unsigned LEB128 varint, advancing `off`.
pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for i in 0..10 {
        let byte = *src
            .get(*off)
            .ok_or(VellumError::Corruption("varint truncated"))?;
        *off += 1;
        let payload = (byte & 0x7f) as u64;
        if shift == 63 && payload > 1 {
            return Err(VellumError::Corruption("varint overflows u64"));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            if i > 0 && payload == 0 {
                return Err(VellumError::Corruption("varint not minimal"));
            }
            return Ok(result);
        }
        shift += 7;
    }
    Err(VellumError::Corruption("varint longer than 10 bytes"))
}

/// Decodes a varint and narrows it to `usize`.
pub fn decode_len(src: &[u8], off: &mut usize) -> Result<usize> {
    let v = decode_u64(src, off)?;
    usize::try_from(v).map_err(|_| VellumError::Corruption("length exceeds address space"))
}

/// Takes `n` bytes starting at `off`, advancing it.
pub fn take<'a>(src: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = off
        .checked_add(n)
        .ok_or(VellumError::Corruption("offset overflow"))?;
    if end > src.len() {
        return Err(VellumError::Corruption("field extends past end of buffer"));
    }
    let slice = &src[*off..end];
    *off = end;
    Ok(slice)
}
