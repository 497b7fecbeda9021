//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{DocbagError, Result};

/// Installs a global `fmt` subscriber filtered by `level`, an `EnvFilter`
/// directive such as `info` or `docbag=debug`. `RUST_LOG` wins when set.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(level),
    }
    .map_err(|e| DocbagError::invalid(format!("invalid log level: {e}")))?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| DocbagError::invalid("logging already initialized"))
}
