//! CLI command implementations

pub mod accounts;
pub mod logs;
pub mod sync;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use ofxsync_core::{EntryPoint, LoggingService, SyncContext};

pub const DATA_DIR_ENV: &str = "OFXSYNC_DIR";

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".ofxsync"))
        .ok_or_else(|| anyhow!("Could not find home directory; set {}", DATA_DIR_ENV))
}

/// Open the event log on its own, without touching the main database
pub fn get_logging_service() -> Result<LoggingService> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;
    LoggingService::new(&data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
}

/// Get or create the sync context
pub fn get_context() -> Result<SyncContext> {
    let data_dir = get_data_dir()?;
    SyncContext::new(&data_dir, EntryPoint::Cli).context("Failed to initialize ofxsync context")
}
