//! Reading and writing out-of-line bytes in append-only data files.
//!
//! A commit buffers every new node encoding and out-of-line value through a
//! [`DataFileWriter`], which assigns offsets immediately and persists each
//! buffered file with one expected-absent conditional write at flush time.
//! Reads go through [`DataFileReader`], which merges adjacent requests
//! within a configurable byte threshold into single base-store fetches.
//! Both sides bound their in-flight base-store operations with a shared
//! semaphore.

use bytes::Bytes;
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

use crate::error::{Result, VellumError};
use crate::format::node::{DataFileId, IndirectDataReference};
use crate::kvstore::{KvStore, StorageGeneration, WriteOutcome};

/// Default bound on simultaneous in-flight base-store operations.
pub const DEFAULT_IO_CONCURRENCY: usize = 32;

/// Target size at which the writer rotates to a fresh data file.
const TARGET_DATA_FILE_BYTES: usize = 4 << 20;

/// Shared in-flight I/O budget.
#[derive(Debug, Clone)]
pub struct IoLimits {
    semaphore: Arc<Semaphore>,
}

impl IoLimits {
    /// Creates a budget admitting `limit` concurrent operations.
    pub fn new(limit: usize) -> Self {
        IoLimits {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    pub(crate) async fn acquire(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("io semaphore never closed")
    }
}

impl Default for IoLimits {
    fn default() -> Self {
        IoLimits::new(DEFAULT_IO_CONCURRENCY)
    }
}

/// One planned base-store fetch covering one or more requested references.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PlannedFetch {
    file: DataFileId,
    start: u64,
    end: u64,
    /// Indices into the request slice served by this fetch.
    members: SmallVec<[usize; 4]>,
}

/// Groups references by file and merges runs whose gap is within
/// `threshold`, producing the minimal fetch set. Pure; unit-tested directly.
pub(crate) fn plan_fetches(
    refs: &[IndirectDataReference],
    threshold: Option<u64>,
) -> Vec<PlannedFetch> {
    let mut order: Vec<usize> = (0..refs.len()).filter(|&i| refs[i].length > 0).collect();
    order.sort_by_key(|&i| (refs[i].file, refs[i].offset, refs[i].length));

    let mut fetches: Vec<PlannedFetch> = Vec::new();
    for i in order {
        let r = &refs[i];
        let end = r.offset + r.length;
        match fetches.last_mut() {
            Some(last)
                if last.file == r.file
                    && threshold
                        .is_some_and(|t| r.offset <= last.end.saturating_add(t)) =>
            {
                last.end = last.end.max(end);
                last.members.push(i);
            }
            _ => fetches.push(PlannedFetch {
                file: r.file,
                start: r.offset,
                end,
                members: smallvec![i],
            }),
        }
    }
    fetches
}

/// Resolves indirect references to loaded bytes.
#[derive(Debug, Clone)]
pub struct DataFileReader {
    base: Arc<dyn KvStore>,
    limits: IoLimits,
    coalescing_threshold: Option<u64>,
}

impl DataFileReader {
    /// Creates a reader over `base`; `coalescing_threshold = None` disables
    /// merging entirely.
    pub fn new(base: Arc<dyn KvStore>, limits: IoLimits, coalescing_threshold: Option<u64>) -> Self {
        DataFileReader {
            base,
            limits,
            coalescing_threshold,
        }
    }

    /// Reads the bytes named by one reference.
    pub async fn read(&self, r: IndirectDataReference) -> Result<Bytes> {
        Ok(self.read_many(&[r]).await?.pop().expect("one result per ref"))
    }

    /// Reads many references, merging adjacent ranges into shared fetches.
    pub async fn read_many(&self, refs: &[IndirectDataReference]) -> Result<Vec<Bytes>> {
        let fetches = plan_fetches(refs, self.coalescing_threshold);
        trace!(
            requested = refs.len(),
            fetches = fetches.len(),
            "datafile.read_many"
        );
        let mut handles = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            let base = Arc::clone(&self.base);
            let limits = self.limits.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limits.acquire().await;
                let key = fetch.file.relative_key();
                let bytes = base.get_range(&key, fetch.start, fetch.end).await?;
                Ok::<_, VellumError>((fetch, bytes))
            }));
        }
        let mut results: Vec<Bytes> = vec![Bytes::new(); refs.len()];
        for handle in handles {
            let (fetch, bytes) = handle
                .await
                .map_err(|_| VellumError::Corruption("data file fetch task failed"))??;
            for &i in &fetch.members {
                let r = &refs[i];
                let start = (r.offset - fetch.start) as usize;
                let end = start + r.length as usize;
                results[i] = bytes.slice(start..end);
            }
        }
        Ok(results)
    }
}

struct PendingFile {
    id: DataFileId,
    buf: Vec<u8>,
}

#[derive(Default)]
struct WriterState {
    current: Option<PendingFile>,
    full: Vec<PendingFile>,
}

/// Buffers out-of-line writes and persists them as append-only data files.
///
/// Offsets are assigned at `write` time so callers can embed references
/// before anything hits the base store; `flush` publishes every buffered
/// file concurrently. A writer is used by exactly one commit attempt.
pub struct DataFileWriter {
    base: Arc<dyn KvStore>,
    limits: IoLimits,
    state: Mutex<WriterState>,
}

impl DataFileWriter {
    /// Creates an empty writer over `base`.
    pub fn new(base: Arc<dyn KvStore>, limits: IoLimits) -> Self {
        DataFileWriter {
            base,
            limits,
            state: Mutex::new(WriterState::default()),
        }
    }

    /// Appends `bytes` to a data file and returns their reference.
    pub fn write(&self, bytes: &[u8]) -> IndirectDataReference {
        let mut state = self.state.lock();
        let rotate = state
            .current
            .as_ref()
            .is_some_and(|f| !f.buf.is_empty() && f.buf.len() + bytes.len() > TARGET_DATA_FILE_BYTES);
        if rotate {
            let full = state.current.take().expect("rotate implies current");
            state.full.push(full);
        }
        let file = state.current.get_or_insert_with(|| PendingFile {
            id: DataFileId::random(),
            buf: Vec::new(),
        });
        let offset = file.buf.len() as u64;
        file.buf.extend_from_slice(bytes);
        IndirectDataReference {
            file: file.id,
            offset,
            length: bytes.len() as u64,
        }
    }

    /// Total bytes buffered and not yet flushed.
    pub fn buffered_bytes(&self) -> usize {
        let state = self.state.lock();
        state.full.iter().map(|f| f.buf.len()).sum::<usize>()
            + state.current.as_ref().map_or(0, |f| f.buf.len())
    }

    /// Persists every buffered data file. Distinct files are written
    /// concurrently, each with an expected-absent conditional write.
    pub async fn flush(&self) -> Result<()> {
        let files = {
            let mut state = self.state.lock();
            let mut files = std::mem::take(&mut state.full);
            if let Some(current) = state.current.take() {
                if !current.buf.is_empty() {
                    files.push(current);
                }
            }
            files
        };
        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            let base = Arc::clone(&self.base);
            let limits = self.limits.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limits.acquire().await;
                let key = file.id.relative_key();
                let len = file.buf.len();
                let outcome = base
                    .conditional_write(
                        &key,
                        Some(Bytes::from(file.buf)),
                        &StorageGeneration::none(),
                    )
                    .await?;
                match outcome {
                    WriteOutcome::Committed(_) => {
                        trace!(key, bytes = len, "datafile.flush");
                        Ok(())
                    }
                    // A random 128-bit id collided; treat as an I/O fault so
                    // the commit loop retries with fresh ids.
                    WriteOutcome::GenerationMismatch => Err(VellumError::Io(
                        std::io::Error::other("data file id collision"),
                    )),
                }
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|_| VellumError::Corruption("data file flush task failed"))??;
        }
        Ok(())
    }
}
