//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "database": { "path": "ofxsync.duckdb" },
//!   "ofx": { "appId": "QWIN", "appVersion": "2200", "version": "103" },
//!   "sync": { "concurrency": 1, "requestTimeoutSecs": 60, "dedupeByFitid": true },
//!   "tagging": { "defaultTags": ["unreviewed"], "rules": [{ "pattern": "^AMZN", "tags": ["shopping"] }] }
//! }
//! ```
//! Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_DATABASE: &str = "ofxsync.duckdb";
pub const DATABASE_ENV: &str = "OFXSYNC_DATABASE";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SettingsFile {
    database: DatabaseSettings,
    ofx: OfxSettings,
    sync: SyncSettings,
    tagging: TaggingSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DatabaseSettings {
    path: Option<String>,
}

/// Client identity sent to institutions, unless a bank overrides it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfxSettings {
    pub app_id: String,
    pub app_version: String,
    /// Protocol version, "103" or "1.03" style
    pub version: String,
}

impl Default for OfxSettings {
    fn default() -> Self {
        Self {
            app_id: "QWIN".to_string(),
            app_version: "2200".to_string(),
            version: "103".to_string(),
        }
    }
}

/// Sync pass tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Accounts processed at once
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Deadline for the whole pass
    pub pass_timeout_secs: u64,
    /// Total attempts for network and timeout failures
    pub retry_attempts: u32,
    /// First backoff delay, doubled on each retry
    pub retry_delay_ms: u64,
    pub dedupe_by_fitid: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            request_timeout_secs: 60,
            pass_timeout_secs: 600,
            retry_attempts: 3,
            retry_delay_ms: 500,
            dedupe_by_fitid: true,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("sync.concurrency must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(Error::config("sync.retryAttempts must be at least 1"));
        }
        if self.request_timeout_secs == 0 || self.pass_timeout_secs == 0 {
            return Err(Error::config("sync timeouts must be positive"));
        }
        Ok(())
    }
}

/// Tags applied to downloaded transactions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaggingSettings {
    /// Applied to every new transaction
    pub default_tags: Vec<String>,
    pub rules: Vec<TagRuleSettings>,
}

/// Case-insensitive regex on the description and the tags it adds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRuleSettings {
    pub pattern: String,
    pub tags: Vec<String>,
}

/// ofxsync configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub ofx: OfxSettings,
    pub sync: SyncSettings,
    pub tagging: TaggingSettings,
}

impl Config {
    /// Load config from the data directory
    ///
    /// A missing settings file means defaults. `OFXSYNC_DATABASE` overrides
    /// the database path.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with_database(data_dir, std::env::var(DATABASE_ENV).ok())
    }

    fn load_with_database(data_dir: &Path, database_override: Option<String>) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content).map_err(|e| {
                Error::config(format!("{}: {}", settings_path.display(), e))
            })?
        } else {
            SettingsFile::default()
        };

        raw.sync.validate()?;

        let database = database_override
            .filter(|p| !p.trim().is_empty())
            .or(raw.database.path)
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        let database = PathBuf::from(database);
        let database_path = if database.is_absolute() {
            database
        } else {
            data_dir.join(database)
        };

        Ok(Self {
            database_path,
            ofx: raw.ofx,
            sync: raw.sync,
            tagging: raw.tagging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_settings(dir: &TempDir, content: &str) {
        std::fs::write(dir.path().join(SETTINGS_FILE), content).unwrap();
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_with_database(dir.path(), None).unwrap();

        assert_eq!(config.database_path, dir.path().join(DEFAULT_DATABASE));
        assert_eq!(config.ofx, OfxSettings::default());
        assert_eq!(config.sync.concurrency, 1);
        assert_eq!(config.sync.request_timeout_secs, 60);
        assert!(config.sync.dedupe_by_fitid);
        assert!(config.tagging.default_tags.is_empty());
    }

    #[test]
    fn test_partial_settings() {
        let dir = TempDir::new().unwrap();
        write_settings(
            &dir,
            r#"{
                "ofx": { "appVersion": "2500" },
                "sync": { "concurrency": 4, "dedupeByFitid": false },
                "tagging": {
                    "defaultTags": ["ofx"],
                    "rules": [{ "pattern": "^AMZN", "tags": ["shopping"] }]
                },
                "unknownSection": { "kept": true }
            }"#,
        );

        let config = Config::load_with_database(dir.path(), None).unwrap();
        assert_eq!(config.ofx.app_id, "QWIN");
        assert_eq!(config.ofx.app_version, "2500");
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.pass_timeout_secs, 600);
        assert!(!config.sync.dedupe_by_fitid);
        assert_eq!(config.tagging.default_tags, vec!["ofx"]);
        assert_eq!(config.tagging.rules[0].tags, vec!["shopping"]);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, "{ not json");

        let err = Config::load_with_database(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, r#"{ "sync": { "concurrency": 0 } }"#);
        assert!(Config::load_with_database(dir.path(), None).is_err());
    }

    #[test]
    fn test_database_override() {
        let dir = TempDir::new().unwrap();
        write_settings(&dir, r#"{ "database": { "path": "from-file.duckdb" } }"#);

        let config = Config::load_with_database(dir.path(), None).unwrap();
        assert_eq!(config.database_path, dir.path().join("from-file.duckdb"));

        let elsewhere = dir.path().join("nested").join("env.duckdb");
        let config = Config::load_with_database(
            dir.path(),
            Some(elsewhere.to_string_lossy().to_string()),
        )
        .unwrap();
        assert_eq!(config.database_path, elsewhere);
    }

    #[test]
    fn test_backoff_doubles() {
        let sync = SyncSettings {
            retry_delay_ms: 100,
            ..Default::default()
        };
        assert_eq!(sync.backoff(0), Duration::from_millis(100));
        assert_eq!(sync.backoff(1), Duration::from_millis(200));
        assert_eq!(sync.backoff(3), Duration::from_millis(800));
    }
}
