//! Tracing initialization for binaries and tests.

use crate::error::{Result, VellumError};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber with the given filter directive.
///
/// Fails if the directive does not parse or a subscriber is already
/// installed.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| VellumError::InvalidArgument(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| VellumError::InvalidArgument("logging already initialized".into()))
}
