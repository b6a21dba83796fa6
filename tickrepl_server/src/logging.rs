// Global `tracing` subscriber for the `tickrepl` binary.
//
// `RUST_LOG` wins when it parses; otherwise `level` (from `--log-level`) is
// used as the filter. Output goes to stderr, or to `log_file` (truncated,
// no ANSI colours) when one is given.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::LoggingError;

pub const DEFAULT_LEVEL: &str = "info";

pub fn init(level: &str, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path).map_err(|source| LoggingError::File {
                path: path.to_path_buf(),
                source,
            })?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    let stderr_layer = file_layer.is_none().then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;
    Ok(())
}
