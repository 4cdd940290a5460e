//! Tracing setup shared by the orchestrator and its worker processes
//!
//! Console output is filtered by `RUST_LOG` (default: info for the geoseed crates).
//! With a log file, the same events are appended to it without ANSI
//! colours; workers are given the same path, so one file holds the run.

use geoseed_common::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "geoseed_etl=info,geoseed_common=info,geoseed=info";

/// Install the global subscriber
///
/// # Arguments
/// * `log_file` - Optional file to append to, created if missing
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}
