//! Logging setup
//!
//! Logs go to `<data_dir>/kitsunari/kitsunari.log` by default so the terminal
//! stays clean while the player runs; `--verbose` sends them to stderr instead.
//! `RUST_LOG` overrides the default filter.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "kitsunari=info";
const VERBOSE_FILTER: &str = "kitsunari=debug";

/// Default log file location
pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("kitsunari").join("kitsunari.log"))
}

/// Install the global subscriber
pub fn init(verbose: bool) -> Result<()> {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());

    if verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to install logger")?;
        return Ok(());
    }

    let path = default_log_path().context("Could not determine log path")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("Failed to install logger")?;
    Ok(())
}
