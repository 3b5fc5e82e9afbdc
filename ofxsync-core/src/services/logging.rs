//! Logging service - structured event logging to DuckDB
//!
//! Provides a privacy-safe event log stored in logs.duckdb next to the main
//! database. Only identifiers, counts and error classifications are stored:
//! no amounts, descriptions, account numbers or credentials.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::LogEvent;
use crate::log_migrations::LOG_MIGRATIONS;
use crate::ports::EventSink;
use crate::services::MigrationService;

pub const LOG_DATABASE: &str = "logs.duckdb";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique ID based on timestamp + counter
fn generate_id() -> u64 {
    let timestamp = now_ms() as u64;

    // Lower 16 bits: counter (65536 unique IDs per millisecond)
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (timestamp << 16) | counter
}

/// Get current unix timestamp in milliseconds
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn detect_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

/// What started the process writing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    /// Library embedded in another process (scheduler, tests)
    Embedded,
}

impl EntryPoint {
    fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Embedded => "embedded",
        }
    }
}

/// A log entry as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: i64,
    pub entry_point: String,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub account_id: Option<String>,
    pub command: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub transactions_added: Option<i64>,
}

/// Service for structured event logging
pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
    platform: &'static str,
}

impl LoggingService {
    /// Open or create logs.duckdb in the data directory and run any pending
    /// migrations
    pub fn new(
        data_dir: &Path,
        entry_point: EntryPoint,
        app_version: impl Into<String>,
    ) -> Result<Self> {
        let db_path = data_dir.join(LOG_DATABASE);
        let conn = Connection::open(&db_path)?;
        MigrationService::with_migrations(&conn, LOG_MIGRATIONS).run_pending()?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            entry_point,
            app_version: app_version.into(),
            platform: detect_platform(),
        })
    }

    /// Log an event
    ///
    /// The entry_point, app_version, and platform are added from the service
    /// configuration.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO sys_logs (
                id, timestamp, entry_point, app_version, platform,
                event, account_id, command, error_kind, error_message, transactions_added
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            duckdb::params![
                generate_id(),
                now_ms(),
                self.entry_point.as_str(),
                &self.app_version,
                self.platform,
                &event.event,
                event.account_id.map(|id| id.to_string()),
                &event.command,
                &event.error_kind,
                &event.error_message,
                event.count.map(|c| c as i64),
            ],
        )?;

        Ok(())
    }

    /// Log a CLI command execution
    pub fn log_command(&self, command: &str) -> Result<()> {
        self.log(LogEvent::new("command_executed").with_command(command))
    }

    /// Most recent entries, newest first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.query_entries("", limit)
    }

    /// Most recent entries carrying an error, newest first
    pub fn get_errors(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.query_entries("WHERE error_kind IS NOT NULL OR error_message IS NOT NULL", limit)
    }

    fn query_entries(&self, filter: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        let sql = format!(
            r#"
            SELECT id, timestamp, entry_point, app_version, platform,
                   event, account_id, command, error_kind, error_message, transactions_added
            FROM sys_logs
            {}
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
            filter
        );
        let mut stmt = conn.prepare(&sql)?;

        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    entry_point: row.get(2)?,
                    app_version: row.get(3)?,
                    platform: row.get(4)?,
                    event: row.get(5)?,
                    account_id: row.get(6)?,
                    command: row.get(7)?,
                    error_kind: row.get(8)?,
                    error_message: row.get(9)?,
                    transactions_added: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Get the total number of log entries
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_logs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete logs older than the specified timestamp (unix ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let deleted = conn.execute("DELETE FROM sys_logs WHERE timestamp < ?", [timestamp_ms])?;
        Ok(deleted as u64)
    }

    /// Delete logs older than `days` days
    pub fn delete_older_than_days(&self, days: u32) -> Result<u64> {
        self.delete_before(now_ms() - i64::from(days) * DAY_MS)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl EventSink for LoggingService {
    fn record(&self, event: LogEvent) {
        let name = event.event.clone();
        if let Err(e) = self.log(event) {
            tracing::warn!(event = %name, "failed to record event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::Error;
    use crate::domain::{ACCOUNT_FAILED, ACCOUNT_SYNCED, SYNC_STARTED};
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn test_logging_service_creation() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();
        assert!(service.db_path().exists());

        // Reopening applies nothing new
        drop(service);
        LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();
    }

    #[test]
    fn test_log_event() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();

        service.log(LogEvent::new(SYNC_STARTED).with_command("sync")).unwrap();

        let entries = service.get_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "sync_started");
        assert_eq!(entries[0].entry_point, "cli");
        assert_eq!(entries[0].app_version, "1.0.0");
        assert_eq!(entries[0].command.as_deref(), Some("sync"));
    }

    #[test]
    fn test_event_sink_records_account_outcomes() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Embedded, "2.0.0").unwrap();
        let account = Uuid::new_v4();

        service.record(LogEvent::new(ACCOUNT_SYNCED).with_account(account).with_count(7));
        service.record(
            LogEvent::new(ACCOUNT_FAILED)
                .with_account(account)
                .with_error(&Error::Network("connection refused".into())),
        );

        let all = service.get_recent(10).unwrap();
        assert_eq!(all.len(), 2);

        let errors = service.get_errors(10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event, "account_failed");
        assert_eq!(errors[0].error_kind.as_deref(), Some("network"));
        assert_eq!(errors[0].account_id, Some(account.to_string()));

        let synced = all.iter().find(|e| e.event == "account_synced").unwrap();
        assert_eq!(synced.transactions_added, Some(7));
        assert_eq!(synced.entry_point, "embedded");
    }

    #[test]
    fn test_count_and_delete() {
        let dir = tempdir().unwrap();
        let service = LoggingService::new(dir.path(), EntryPoint::Cli, "1.0.0").unwrap();

        service.log_command("sync").unwrap();
        service.log_command("logs").unwrap();
        service.log_command("sync").unwrap();
        assert_eq!(service.count().unwrap(), 3);

        assert_eq!(service.delete_older_than_days(1).unwrap(), 0);

        let deleted = service.delete_before(now_ms() + 1000).unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(service.count().unwrap(), 0);
    }
}
