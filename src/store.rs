//! The store façade: open, read, mutate, and describe a versioned store.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::batch::MutationBatch;
use crate::config::{
    ConfigConstraints, DEFAULT_MAX_DECODED_NODE_BYTES, DEFAULT_MAX_INLINE_VALUE_BYTES,
    DEFAULT_VERSION_TREE_ARITY_LOG2,
};
use crate::config::Config;
use crate::datafile::{IoLimits, DEFAULT_IO_CONCURRENCY};
use crate::error::{Result, VellumError};
use crate::format::key::{validate_key, KeyRange};
use crate::format::manifest::{BtreeRoot, Manifest, Version};
use crate::kvstore::file::FileKvStore;
use crate::kvstore::memory::MemoryKvStore;
use crate::kvstore::KvStore;
use crate::spec::{BaseSpec, StoreSpec};
use crate::tree::read::{lookup, RangeScanner};
use crate::tree::{commit, history, TreeIo};

/// A handle to a multiversion store on some base key-value store.
///
/// Cheap to clone; all clones share the same I/O limits.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    io: TreeIo,
    constraints: ConfigConstraints,
    base_spec: BaseSpec,
    read_coalescing_threshold_bytes: Option<u64>,
    io_concurrency: Option<usize>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("base", &self.inner.base_spec)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens the store a spec describes, constructing its base store.
    pub fn open(spec: StoreSpec) -> Result<Store> {
        spec.validate()?;
        let base: Arc<dyn KvStore> = match &spec.base {
            BaseSpec::Memory => Arc::new(MemoryKvStore::new()),
            BaseSpec::File { path } => Arc::new(FileKvStore::new(path.clone())?),
        };
        Store::open_with_base(base, spec)
    }

    /// Opens the store on an existing base store, e.g. one shared between
    /// handles in tests.
    pub fn open_with_base(base: Arc<dyn KvStore>, spec: StoreSpec) -> Result<Store> {
        spec.validate()?;
        let limits = IoLimits::new(spec.io_concurrency.unwrap_or(DEFAULT_IO_CONCURRENCY));
        let io = TreeIo {
            base,
            limits,
            coalescing_threshold: spec.read_coalescing_threshold_bytes,
        };
        debug!(base = ?spec.base, "store.open");
        Ok(Store {
            inner: Arc::new(StoreInner {
                io,
                constraints: spec.config,
                base_spec: spec.base,
                read_coalescing_threshold_bytes: spec.read_coalescing_threshold_bytes,
                io_concurrency: spec.io_concurrency,
            }),
        })
    }

    async fn load_checked_manifest(&self) -> Result<Option<Manifest>> {
        match self.inner.io.load_manifest().await? {
            None => Ok(None),
            Some((manifest, _)) => {
                self.inner.constraints.matches(&manifest.config)?;
                Ok(Some(manifest))
            }
        }
    }

    /// Reads a key at the latest version.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        validate_key(key)?;
        let Some(manifest) = self.load_checked_manifest().await? else {
            return Ok(None);
        };
        let Some(root) = manifest.latest_version().root else {
            return Ok(None);
        };
        match lookup(&self.inner.io, &manifest.config, &root, key).await? {
            None => Ok(None),
            Some(value) => Ok(Some(self.inner.io.resolve_value(&value).await?)),
        }
    }

    /// Writes one key, committing a new version.
    pub async fn put(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<Version> {
        let mut batch = self.batch();
        batch.put(key, value)?;
        batch.commit().await
    }

    /// Deletes one key, committing a new version.
    pub async fn delete(&self, key: impl Into<Bytes>) -> Result<Version> {
        let mut batch = self.batch();
        batch.delete(key)?;
        batch.commit().await
    }

    /// Deletes every key in `range`, committing a new version.
    pub async fn delete_range(&self, range: KeyRange) -> Result<Version> {
        let mut batch = self.batch();
        batch.delete_range(range)?;
        batch.commit().await
    }

    /// Keys starting with `prefix` at the latest version, in order.
    pub async fn list(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        self.snapshot(None).await?.list(prefix).await
    }

    /// Starts an atomic mutation batch against this store.
    pub fn batch(&self) -> BatchBuilder {
        BatchBuilder {
            store: self.clone(),
            batch: MutationBatch::new(),
        }
    }

    /// A read-only view of one version; `None` selects the latest.
    pub async fn snapshot(&self, generation: Option<u64>) -> Result<Snapshot> {
        let manifest = self.load_checked_manifest().await?;
        let (config, version) = match (manifest, generation) {
            (None, None) => {
                return Ok(Snapshot {
                    io: self.inner.io.clone(),
                    config: self.inner.constraints.create()?,
                    version: Version {
                        generation: 0,
                        commit_time_millis: 0,
                        root: None,
                    },
                })
            }
            (None, Some(_)) => return Err(VellumError::NotFound("generation")),
            (Some(manifest), None) => (manifest.config, *manifest.latest_version()),
            (Some(manifest), Some(g)) => {
                let version = history::resolve_generation(&self.inner.io, &manifest, g).await?;
                (manifest.config, version)
            }
        };
        Ok(Snapshot {
            io: self.inner.io.clone(),
            config,
            version,
        })
    }

    /// The decoded manifest, or `None` before the first commit.
    pub async fn read_manifest(&self) -> Result<Option<Manifest>> {
        self.load_checked_manifest().await
    }

    /// The canonical spec reproducing this store.
    ///
    /// With `include_defaults`, config fields not pinned by a committed
    /// manifest or by the open-time constraints are filled with their
    /// defaults.
    pub async fn spec(&self, include_defaults: bool) -> Result<StoreSpec> {
        let mut config = match self.load_checked_manifest().await? {
            Some(manifest) => ConfigConstraints::from_config(&manifest.config),
            None => self.inner.constraints.clone(),
        };
        if include_defaults {
            config.compression.get_or_insert_with(Default::default);
            config
                .max_decoded_node_bytes
                .get_or_insert(DEFAULT_MAX_DECODED_NODE_BYTES);
            config
                .max_inline_value_bytes
                .get_or_insert(DEFAULT_MAX_INLINE_VALUE_BYTES);
            config
                .version_tree_arity_log2
                .get_or_insert(DEFAULT_VERSION_TREE_ARITY_LOG2);
        }
        Ok(StoreSpec {
            driver: crate::spec::DRIVER_ID.to_owned(),
            base: self.inner.base_spec.clone(),
            config,
            read_coalescing_threshold_bytes: self.inner.read_coalescing_threshold_bytes,
            io_concurrency: self.inner.io_concurrency,
        })
    }
}

/// Accumulates mutations and commits them as one atomic version.
///
/// Within a batch, later operations override earlier ones key by key; a
/// delete range erases earlier point writes it covers but not later ones.
pub struct BatchBuilder {
    store: Store,
    batch: MutationBatch,
}

impl BatchBuilder {
    /// Stages a write.
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.batch.put(key, value)
    }

    /// Stages a point delete.
    pub fn delete(&mut self, key: impl Into<Bytes>) -> Result<()> {
        self.batch.delete(key)
    }

    /// Stages a range delete.
    pub fn delete_range(&mut self, range: KeyRange) -> Result<()> {
        self.batch.delete_range(range)
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Applies the batch on top of the latest version and publishes the
    /// resulting version, retrying on concurrent commits.
    pub async fn commit(self) -> Result<Version> {
        let store = &self.store.inner;
        let (_, version) =
            commit::commit_batch(&store.io, &store.constraints, &self.batch).await?;
        Ok(version)
    }
}

/// A read-only view pinned to one committed version.
#[derive(Debug)]
pub struct Snapshot {
    io: TreeIo,
    config: Config,
    version: Version,
}

impl Snapshot {
    /// Generation this snapshot reads from.
    pub fn generation(&self) -> u64 {
        self.version.generation
    }

    /// Commit time of the pinned version, unix milliseconds.
    pub fn commit_time_millis(&self) -> u64 {
        self.version.commit_time_millis
    }

    /// Root of the pinned tree, absent when it is empty.
    pub fn root(&self) -> Option<&BtreeRoot> {
        self.version.root.as_ref()
    }

    /// Reads a key at this version.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        validate_key(key)?;
        let Some(root) = self.version.root else {
            return Ok(None);
        };
        match lookup(&self.io, &self.config, &root, key).await? {
            None => Ok(None),
            Some(value) => Ok(Some(self.io.resolve_value(&value).await?)),
        }
    }

    /// Lazy ordered scan of `range` at this version.
    pub fn scan(&self, range: KeyRange) -> RangeScanner {
        RangeScanner::new(self.io.clone(), self.config, self.version.root, range)
    }

    /// All `(key, value)` pairs in `range`, values resolved.
    pub async fn entries(&self, range: KeyRange) -> Result<Vec<(Bytes, Bytes)>> {
        self.scan(range).collect_resolved().await
    }

    /// Keys starting with `prefix`, without touching their values.
    pub async fn list(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        let mut scanner = self.scan(KeyRange::prefix(Bytes::copy_from_slice(prefix.as_ref())));
        let mut keys = Vec::new();
        while let Some((key, _)) = scanner.next().await? {
            keys.push(key);
        }
        Ok(keys)
    }
}
