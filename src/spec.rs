//! JSON store specifications.
//!
//! A [`StoreSpec`] is the serializable description of how to open a store:
//! the driver id, the base key-value store, config constraints, and I/O
//! tuning. `Store::spec` returns one that round-trips back to an
//! equivalently configured store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ConfigConstraints;
use crate::error::{Result, VellumError};

/// Driver id carried by every spec.
pub const DRIVER_ID: &str = "vellum";

fn default_driver() -> String {
    DRIVER_ID.to_owned()
}

/// Which base key-value store holds the manifest and data files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase", deny_unknown_fields)]
pub enum BaseSpec {
    /// In-process store, lost on drop. Mostly for tests.
    Memory,
    /// Files under a local directory.
    File {
        /// Root directory of the store.
        path: PathBuf,
    },
}

/// A complete, serializable store description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSpec {
    /// Always [`DRIVER_ID`]; rejected otherwise when opening.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// The base store.
    pub base: BaseSpec,
    /// Constraints the committed config must satisfy.
    #[serde(default, skip_serializing_if = "ConfigConstraints::is_empty")]
    pub config: ConfigConstraints,
    /// Merge adjacent data-file reads closer than this many bytes; `None`
    /// disables coalescing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_coalescing_threshold_bytes: Option<u64>,
    /// Bound on concurrent base-store requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_concurrency: Option<usize>,
}

impl StoreSpec {
    /// Spec for an in-memory store with default settings.
    pub fn memory() -> Self {
        StoreSpec {
            driver: default_driver(),
            base: BaseSpec::Memory,
            config: ConfigConstraints::default(),
            read_coalescing_threshold_bytes: None,
            io_concurrency: None,
        }
    }

    /// Spec for a file-backed store rooted at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        StoreSpec {
            base: BaseSpec::File { path: path.into() },
            ..StoreSpec::memory()
        }
    }

    /// Checks the driver id and the config constraints.
    pub fn validate(&self) -> Result<()> {
        if self.driver != DRIVER_ID {
            return Err(VellumError::InvalidArgument(format!(
                "unknown driver {:?}, expected {DRIVER_ID:?}",
                self.driver
            )));
        }
        if self.io_concurrency == Some(0) {
            return Err(VellumError::InvalidArgument(
                "io_concurrency must be at least 1".into(),
            ));
        }
        self.config.check_values()
    }

    /// Parses a spec from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: StoreSpec = serde_json::from_str(json)
            .map_err(|e| VellumError::InvalidArgument(format!("bad store spec: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Serializes the spec to JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| VellumError::InvalidArgument(format!("unencodable store spec: {e}")))
    }
}
