//! Filesystem base store.
//!
//! Keys map to paths under a root directory; values are whole files written
//! via temp-file-and-rename. Generation tokens are xxh64 digests of the file
//! content, and conditional writes are serialized by an in-process lock —
//! sufficient for the single-process coordination this backend claims.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use xxhash_rust::xxh64::xxh64;

use super::{slice_range, KvStore, StorageGeneration, WriteOutcome};
use crate::error::{Result, VellumError};

/// A [`KvStore`] rooted at a local directory.
pub struct FileKvStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileKvStore {
    /// Opens (and creates if absent) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FileKvStore {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key
                .split('/')
                .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(VellumError::InvalidArgument(format!(
                "key `{key}` is not a valid relative path"
            )));
        }
        Ok(self.root.join(key))
    }
}

impl fmt::Debug for FileKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKvStore")
            .field("root", &self.root)
            .finish()
    }
}

fn content_token(bytes: &[u8]) -> StorageGeneration {
    StorageGeneration::from_token(format!("{:016x}", xxh64(bytes, 0)))
}

async fn read_optional(path: &Path) -> Result<Option<Bytes>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(Bytes::from(bytes))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<(Bytes, StorageGeneration)>> {
        let path = self.path_for(key)?;
        Ok(read_optional(&path)
            .await?
            .map(|bytes| (bytes.clone(), content_token(&bytes))))
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> Result<Bytes> {
        if start > end {
            return Err(VellumError::InvalidArgument(format!(
                "byte range [{start}, {end}) is inverted"
            )));
        }
        let path = self.path_for(key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VellumError::NotFound("data file"));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if end > len {
            return Err(VellumError::Corruption("byte range past end of data file"));
        }
        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn conditional_write(
        &self,
        key: &str,
        value: Option<Bytes>,
        expected: &StorageGeneration,
    ) -> Result<WriteOutcome> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;
        let current = match read_optional(&path).await? {
            Some(bytes) => content_token(&bytes),
            None => StorageGeneration::none(),
        };
        if current != *expected {
            return Ok(WriteOutcome::GenerationMismatch);
        }
        match value {
            Some(bytes) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, &bytes).await?;
                tokio::fs::rename(&tmp, &path).await?;
                Ok(WriteOutcome::Committed(content_token(&bytes)))
            }
            None => {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                Ok(WriteOutcome::Committed(StorageGeneration::none()))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|_| VellumError::Corruption("listing escaped store root"))?;
                let key = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                if key.starts_with(prefix) && !key.ends_with(".tmp") {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
