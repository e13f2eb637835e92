//! Vellum: a multiversion key-value store layered on any key-value store.
//!
//! Every commit produces a new immutable version of a copy-on-write B-tree
//! whose nodes live in append-only data files on a base store. A single
//! manifest record, replaced through conditional writes, names the committed
//! configuration, the recent versions, and a skip index over the older ones.
//! Concurrent writers race on the manifest and retry; readers never block.
//!
//! ```no_run
//! # async fn example() -> vellum::Result<()> {
//! use vellum::{Store, StoreSpec};
//!
//! let store = Store::open(StoreSpec::memory())?;
//! store.put(&b"greeting"[..], &b"hello"[..]).await?;
//! assert_eq!(store.get(b"greeting").await?.unwrap(), &b"hello"[..]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod compression;
pub mod config;
pub mod datafile;
pub mod error;
pub mod format;
pub mod kvstore;
pub mod logging;
pub mod spec;
pub mod store;
pub mod tree;

pub use batch::MutationBatch;
pub use compression::Compression;
pub use config::{Config, ConfigConstraints, StoreUuid};
pub use error::{Result, VellumError};
pub use format::key::KeyRange;
pub use format::manifest::{Manifest, Version};
pub use spec::{BaseSpec, StoreSpec};
pub use store::{BatchBuilder, Snapshot, Store};
