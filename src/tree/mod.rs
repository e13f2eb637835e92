//! The copy-on-write B-tree: read path, version history, and commits.

pub mod commit;
pub mod history;
pub mod read;

use bytes::Bytes;
use std::sync::Arc;

use crate::config::Config;
use crate::datafile::{DataFileReader, IoLimits};
use crate::error::{Result, VellumError};
use crate::format::codec::decode_node;
use crate::format::manifest::{decode_manifest, Manifest, MANIFEST_KEY};
use crate::format::node::{IndirectDataReference, LeafValue, Node};
use crate::kvstore::{KvStore, StorageGeneration};

/// Shared I/O handles for all tree operations on one store.
#[derive(Clone, Debug)]
pub(crate) struct TreeIo {
    pub(crate) base: Arc<dyn KvStore>,
    pub(crate) limits: IoLimits,
    pub(crate) coalescing_threshold: Option<u64>,
}

impl TreeIo {
    pub(crate) fn data_reader(&self) -> DataFileReader {
        DataFileReader::new(
            Arc::clone(&self.base),
            self.limits.clone(),
            self.coalescing_threshold,
        )
    }

    /// Reads and decodes the manifest, returning its base-store token for a
    /// later conditional publish.
    pub(crate) async fn load_manifest(&self) -> Result<Option<(Manifest, StorageGeneration)>> {
        let _permit = self.limits.acquire().await;
        match self.base.get(MANIFEST_KEY).await? {
            None => Ok(None),
            Some((bytes, generation)) => Ok(Some((decode_manifest(&bytes)?, generation))),
        }
    }

    /// Fetches and decodes one B-tree node.
    pub(crate) async fn fetch_node(
        &self,
        config: &Config,
        location: IndirectDataReference,
    ) -> Result<Node> {
        let bytes = self.data_reader().read(location).await?;
        decode_node(&bytes, config)
    }

    /// Loads the bytes of a leaf value.
    pub(crate) async fn resolve_value(&self, value: &LeafValue) -> Result<Bytes> {
        match value {
            LeafValue::Inline(bytes) => Ok(bytes.clone()),
            LeafValue::OutOfLine(location) => self.data_reader().read(*location).await,
        }
    }
}

/// Validates that a fetched node sits at the height its parent recorded.
pub(crate) fn check_height(node: &Node, expected: u8) -> Result<()> {
    if node.height() != expected {
        return Err(VellumError::Corruption("child node height mismatch"));
    }
    Ok(())
}
