//! Store configuration and open-time negotiation.
//!
//! A store's [`Config`] is fixed at the first successful commit. Later opens
//! supply [`ConfigConstraints`]; every field a caller explicitly sets must
//! equal the stored value or the open fails with `ConfigMismatch` naming the
//! field. Unset fields take defaults on creation and are simply reported
//! back on open.

use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::compression::Compression;
use crate::error::{Result, VellumError};

/// Default node size budget: 8 MiB.
pub const DEFAULT_MAX_DECODED_NODE_BYTES: u32 = 8_388_608;
/// Default inline/out-of-line threshold for values.
pub const DEFAULT_MAX_INLINE_VALUE_BYTES: u32 = 100;
/// Default branching exponent of the version history index.
pub const DEFAULT_VERSION_TREE_ARITY_LOG2: u8 = 4;
/// Largest supported version-tree branching exponent.
pub const MAX_VERSION_TREE_ARITY_LOG2: u8 = 16;

/// Fixed 128-bit store identity, rendered as 32 hex characters.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StoreUuid(pub [u8; 16]);

impl StoreUuid {
    /// Generates a random identity.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        StoreUuid(bytes)
    }

    /// Parses the 32-hex-character rendering.
    pub fn parse(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|_| VellumError::InvalidArgument(format!("invalid uuid `{s}`")))?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| VellumError::InvalidArgument(format!("uuid `{s}` is not 16 bytes")))?;
        Ok(StoreUuid(bytes))
    }
}

impl fmt::Display for StoreUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for StoreUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreUuid({})", hex::encode(self.0))
    }
}

impl Serialize for StoreUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for StoreUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StoreUuid::parse(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// Negotiated store-wide parameters, immutable once committed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Store identity, generated once at creation.
    pub uuid: StoreUuid,
    /// Compression applied to node payloads.
    pub compression: Compression,
    /// Node size budget driving split/merge decisions.
    pub max_decoded_node_bytes: u32,
    /// Values at most this long are stored inline in leaf nodes.
    pub max_inline_value_bytes: u32,
    /// Branching exponent of the version history index.
    pub version_tree_arity_log2: u8,
}

impl Config {
    /// Version-tree branching factor `B = 2^version_tree_arity_log2`.
    pub fn version_tree_arity(&self) -> u64 {
        1u64 << self.version_tree_arity_log2
    }
}

/// Caller-specified constraints on the config, all fields optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigConstraints {
    /// Required store identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<StoreUuid>,
    /// Required compression selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    /// Required node size budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_decoded_node_bytes: Option<u32>,
    /// Required inline value threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inline_value_bytes: Option<u32>,
    /// Required version-tree branching exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tree_arity_log2: Option<u8>,
}

fn mismatch(
    field: &'static str,
    requested: impl fmt::Display,
    stored: impl fmt::Display,
) -> VellumError {
    VellumError::ConfigMismatch {
        field,
        requested: requested.to_string(),
        stored: stored.to_string(),
    }
}

impl ConfigConstraints {
    /// Rejects constraint values no store could ever commit.
    pub fn check_values(&self) -> Result<()> {
        if let Some(arity) = self.version_tree_arity_log2 {
            if arity == 0 || arity > MAX_VERSION_TREE_ARITY_LOG2 {
                return Err(VellumError::InvalidArgument(format!(
                    "version_tree_arity_log2 must be in 1..={MAX_VERSION_TREE_ARITY_LOG2}, got {arity}"
                )));
            }
        }
        Ok(())
    }

    /// Produces the config for a freshly created store: unset fields take
    /// defaults, the uuid is minted at random unless pinned.
    pub fn create(&self) -> Result<Config> {
        self.check_values()?;
        Ok(Config {
            uuid: self.uuid.unwrap_or_else(StoreUuid::random),
            compression: self.compression.unwrap_or_default(),
            max_decoded_node_bytes: self
                .max_decoded_node_bytes
                .unwrap_or(DEFAULT_MAX_DECODED_NODE_BYTES),
            max_inline_value_bytes: self
                .max_inline_value_bytes
                .unwrap_or(DEFAULT_MAX_INLINE_VALUE_BYTES),
            version_tree_arity_log2: self
                .version_tree_arity_log2
                .unwrap_or(DEFAULT_VERSION_TREE_ARITY_LOG2),
        })
    }

    /// Checks every explicitly specified field against a committed config,
    /// failing with `ConfigMismatch` naming the first disagreement.
    pub fn matches(&self, stored: &Config) -> Result<()> {
        if let Some(uuid) = self.uuid {
            if uuid != stored.uuid {
                return Err(mismatch("uuid", uuid, stored.uuid));
            }
        }
        if let Some(compression) = self.compression {
            if compression != stored.compression {
                return Err(mismatch("compression", compression, stored.compression));
            }
        }
        if let Some(v) = self.max_decoded_node_bytes {
            if v != stored.max_decoded_node_bytes {
                return Err(mismatch(
                    "max_decoded_node_bytes",
                    v,
                    stored.max_decoded_node_bytes,
                ));
            }
        }
        if let Some(v) = self.max_inline_value_bytes {
            if v != stored.max_inline_value_bytes {
                return Err(mismatch(
                    "max_inline_value_bytes",
                    v,
                    stored.max_inline_value_bytes,
                ));
            }
        }
        if let Some(v) = self.version_tree_arity_log2 {
            if v != stored.version_tree_arity_log2 {
                return Err(mismatch(
                    "version_tree_arity_log2",
                    v,
                    stored.version_tree_arity_log2,
                ));
            }
        }
        Ok(())
    }

    /// The fully specified constraints equivalent to a committed config.
    pub fn from_config(config: &Config) -> Self {
        ConfigConstraints {
            uuid: Some(config.uuid),
            compression: Some(config.compression),
            max_decoded_node_bytes: Some(config.max_decoded_node_bytes),
            max_inline_value_bytes: Some(config.max_inline_value_bytes),
            version_tree_arity_log2: Some(config.version_tree_arity_log2),
        }
    }

    /// Whether no field is constrained.
    pub fn is_empty(&self) -> bool {
        *self == ConfigConstraints::default()
    }
}
