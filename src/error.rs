use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VellumError>;

/// Error taxonomy for the engine.
///
/// Absent keys on the read path are reported as `Ok(None)`, not as an error;
/// [`VellumError::NotFound`] is reserved for generation resolution and
/// base-store plumbing where absence is exceptional.
#[derive(Debug, Error)]
pub enum VellumError {
    /// Base-store or filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An open constraint disagrees with the committed config.
    #[error("config mismatch on `{field}`: requested {requested}, stored {stored}")]
    ConfigMismatch {
        /// Name of the first mismatching config field.
        field: &'static str,
        /// Value requested by the open constraints.
        requested: String,
        /// Value fixed in the committed config.
        stored: String,
    },
    /// Checksum or structural failure decoding persisted data. Never retried.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// Compare-and-swap retries exhausted; the batch was not committed.
    #[error("commit conflict: lost the manifest race {attempts} times")]
    CommitConflict {
        /// Number of publish attempts made before giving up.
        attempts: u32,
    },
    /// Requested entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Malformed key, range, or configuration value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl VellumError {
    /// Whether the commit loop may retry after this error.
    ///
    /// Corruption and config mismatches are terminal; I/O failures are
    /// plausibly transient and share the retry budget with CAS conflicts.
    pub fn is_retriable(&self) -> bool {
        matches!(self, VellumError::Io(_))
    }
}
