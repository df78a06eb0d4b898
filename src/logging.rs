//! Process-wide tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{Result, TesseraError};

/// Installs a formatting subscriber filtered by `filter`
/// (`EnvFilter` syntax, e.g. `"tessera=debug"`).
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| TesseraError::Config(format!("invalid log filter: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| TesseraError::Config("logging already initialized".into()))
}
