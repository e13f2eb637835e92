//! On-disk formats: keys, nodes, the manifest, and the version tree.
//!
//! Everything in this module is deterministic and checksummed; decode paths
//! treat their input as untrusted and surface every malformation as
//! `Corruption`.

pub mod codec;
pub mod key;
pub mod manifest;
pub mod node;
pub mod varint;
pub mod version_tree;
