//! In-memory base store, used by tests and as the reference backend.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

use super::{KvStore, StorageGeneration, WriteOutcome};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, (Bytes, u64)>,
    next_generation: u64,
}

/// A [`KvStore`] backed by an in-process ordered map.
///
/// Generation tokens are a process-local counter; conditional writes are
/// atomic under the store's lock.
#[derive(Default)]
pub struct MemoryKvStore {
    inner: Mutex<Inner>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryKvStore::default()
    }

    /// Number of keys currently present (test helper).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("keys", &self.len())
            .finish()
    }
}

fn token(generation: u64) -> StorageGeneration {
    StorageGeneration::from_token(generation.to_string())
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<(Bytes, StorageGeneration)>> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .get(key)
            .map(|(bytes, generation)| (bytes.clone(), token(*generation))))
    }

    async fn conditional_write(
        &self,
        key: &str,
        value: Option<Bytes>,
        expected: &StorageGeneration,
    ) -> Result<WriteOutcome> {
        let mut inner = self.inner.lock();
        let current = match inner.entries.get(key) {
            Some((_, generation)) => token(*generation),
            None => StorageGeneration::none(),
        };
        if current != *expected {
            return Ok(WriteOutcome::GenerationMismatch);
        }
        match value {
            Some(bytes) => {
                inner.next_generation += 1;
                let generation = inner.next_generation;
                inner.entries.insert(key.to_string(), (bytes, generation));
                Ok(WriteOutcome::Committed(token(generation)))
            }
            None => {
                inner.entries.remove(key);
                Ok(WriteOutcome::Committed(StorageGeneration::none()))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
