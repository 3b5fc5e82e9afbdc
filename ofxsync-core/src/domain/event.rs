//! Privacy-safe sync events
//!
//! Events carry identifiers, counts and error classifications only. Amounts,
//! descriptions, account numbers and credentials never go into an event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::Error;

pub const SYNC_STARTED: &str = "sync_started";
pub const ACCOUNT_SYNCED: &str = "account_synced";
pub const ACCOUNT_FAILED: &str = "account_failed";
pub const SYNC_COMPLETED: &str = "sync_completed";

/// A log event to be recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Transactions added (or accounts processed, for pass-level events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl LogEvent {
    /// Create a new log event with just an event name
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            account_id: None,
            command: None,
            error_kind: None,
            error_message: None,
            count: None,
        }
    }

    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Set the command context (for CLI events)
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Set error kind and message from a core error
    pub fn with_error(mut self, err: &Error) -> Self {
        self.error_kind = Some(err.kind().as_str().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}
