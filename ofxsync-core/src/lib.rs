//! ofxsync core - OFX statement download and account sync
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Account, Transaction, etc.)
//! - **ofx**: Request documents, markup tree builder and response parsing
//! - **ports**: Trait definitions for external dependencies (SyncStore, Transport)
//! - **services**: Business logic orchestration
//! - **adapters**: Concrete implementations (DuckDB, HTTP)

pub mod domain;
pub mod ofx;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod log_migrations;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbRepository;
use adapters::http::HttpTransport;
use config::Config;
use ports::{EventSink, NoopEventSink};
use services::*;

// Re-export commonly used types at crate root
pub use domain::{Account, AccountType, Bank, LogEvent, Transaction, TransactionKind};
pub use domain::result::{Error, ErrorKind};
pub use services::{EntryPoint, LogEntry, LoggingService, SyncResult};

/// Main context for sync operations
///
/// Holds the configuration, the database and a sync service wired to the
/// real HTTP transport and the persistent event log.
pub struct SyncContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    /// `None` when the event log could not be opened
    pub logging: Option<Arc<LoggingService>>,
    pub sync_service: SyncService,
}

impl SyncContext {
    /// Create a new context rooted at `data_dir`
    pub fn new(data_dir: &Path, entry_point: EntryPoint) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let config = Config::load(data_dir).context("Failed to load settings")?;

        let repository = Arc::new(
            DuckDbRepository::new(&config.database_path)
                .with_context(|| format!("Failed to open {:?}", config.database_path))?,
        );
        repository.ensure_schema()?;

        // The event log must never block a sync
        let logging = match LoggingService::new(data_dir, entry_point, env!("CARGO_PKG_VERSION")) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                tracing::warn!("event log unavailable: {}", e);
                None
            }
        };
        let events: Arc<dyn EventSink> = match &logging {
            Some(service) => Arc::clone(service) as Arc<dyn EventSink>,
            None => Arc::new(NoopEventSink),
        };

        let transport = Arc::new(HttpTransport::new(config.sync.request_timeout())?);
        let tagging = policy_from_settings(&config.tagging)?;

        let sync_service = SyncService::new(
            Arc::clone(&repository) as Arc<dyn ports::SyncStore>,
            transport,
            tagging,
            events,
            config.ofx.clone(),
            config.sync.clone(),
        );

        Ok(Self {
            config,
            repository,
            logging,
            sync_service,
        })
    }
}
