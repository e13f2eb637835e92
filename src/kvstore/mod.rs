//! The base store: a minimal byte-oriented key-value interface.
//!
//! The engine consumes its backing storage exclusively through [`KvStore`]:
//! plain gets (optionally ranged), a single conditional-write primitive that
//! doubles as delete, and prefix listing. Coordination between concurrent
//! writers happens solely through conditional writes on the manifest key.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::{Result, VellumError};

/// Opaque per-key write token reported by the base store.
///
/// `none` denotes "key absent"; passing it as the expected token makes a
/// conditional write require that the key does not exist yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageGeneration(Option<String>);

impl StorageGeneration {
    /// The token of an absent key.
    pub fn none() -> Self {
        StorageGeneration(None)
    }

    /// A token reported by a successful read or write.
    pub fn from_token(token: impl Into<String>) -> Self {
        StorageGeneration(Some(token.into()))
    }

    /// Whether this is the absent-key token.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for StorageGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("<absent>"),
            Some(token) => f.write_str(token),
        }
    }
}

/// Outcome of a conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The expected token matched; the new token is returned.
    Committed(StorageGeneration),
    /// A concurrent writer changed the key first.
    GenerationMismatch,
}

/// Byte-oriented base store consumed by the engine.
#[async_trait]
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Reads a key, returning its bytes and current generation token.
    async fn get(&self, key: &str) -> Result<Option<(Bytes, StorageGeneration)>>;

    /// Reads `[start, end)` of a key's value.
    ///
    /// The default fetches the whole value and slices; backends with cheap
    /// ranged reads override this.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Bytes> {
        let (bytes, _) = self
            .get(key)
            .await?
            .ok_or(VellumError::NotFound("data file"))?;
        slice_range(&bytes, start, end)
    }

    /// Writes (`value = Some`) or deletes (`value = None`) a key iff its
    /// current generation matches `expected`.
    async fn conditional_write(
        &self,
        key: &str,
        value: Option<Bytes>,
        expected: &StorageGeneration,
    ) -> Result<WriteOutcome>;

    /// Unconditionally removes a key; absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Lists all keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

pub(crate) fn slice_range(bytes: &Bytes, start: u64, end: u64) -> Result<Bytes> {
    if start > end {
        return Err(VellumError::InvalidArgument(format!(
            "byte range [{start}, {end}) is inverted"
        )));
    }
    let len = bytes.len() as u64;
    if end > len {
        return Err(VellumError::Corruption("byte range past end of data file"));
    }
    Ok(bytes.slice(start as usize..end as usize))
}
