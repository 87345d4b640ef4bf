//! Tracing setup for the `olap` binary.
//!
//! Query and processing results are written to stdout, so diagnostics go to
//! stderr unless `--log-file` asks for a file. `OLAP_LOG` takes precedence
//! over `RUST_LOG` and both accept `EnvFilter` directives such as
//! `olap_bridge::db=debug`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::error::{BridgeError, Result};

/// Environment variable read before `RUST_LOG`.
pub const LOG_ENV: &str = "OLAP_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Sends log output to a file, truncating it first.
///
/// With no path the file lives under the platform state directory (see
/// [`get_log_path`]). Returns the path actually written to.
pub fn init_file_logging(path: Option<&Path>) -> Result<PathBuf> {
    let log_path = path.map(Path::to_path_buf).unwrap_or_else(get_log_path);

    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            BridgeError::invalid_configuration(format!(
                "Could not create log directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    let log_file = File::create(&log_path).map_err(|e| {
        BridgeError::invalid_configuration(format!(
            "Could not create log file {}: {}",
            log_path.display(),
            e
        ))
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(log_file)
        .with_ansi(false)
        .try_init()
        .map_err(|e| BridgeError::internal(format!("Logging already initialized: {e}")))?;
    Ok(log_path)
}

/// Sends log output to stderr. A second call is ignored.
pub fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Default log file: `olap-bridge/olap-bridge.log` under the state directory,
/// then the config directory, then the temp directory.
pub fn get_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("olap-bridge").join("olap-bridge.log"))
        .unwrap_or_else(|| std::env::temp_dir().join("olap-bridge.log"))
}
