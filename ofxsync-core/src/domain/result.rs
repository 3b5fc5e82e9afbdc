//! Result and error types for the core library

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core library error type
///
/// Every variant maps to an [`ErrorKind`], which is what gets reported to the
/// event log and surfaced in per-account sync results.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported account type: {0}")]
    UnsupportedAccountType(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Rejected by institution: status {code} ({severity}) {message}")]
    Rejected {
        code: String,
        severity: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable error classification used in logs and sync results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    UnsupportedAccountType,
    Network,
    Timeout,
    MalformedResponse,
    Rejected,
    Database,
    NotFound,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::UnsupportedAccountType => "unsupported_account_type",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Database => "database",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Json(_) => ErrorKind::Config,
            Error::UnsupportedAccountType(_) => ErrorKind::UnsupportedAccountType,
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Error::Rejected { .. } => ErrorKind::Rejected,
            Error::Database(_) => ErrorKind::Database,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Transient failures worth another attempt within the same pass
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Timeout)
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
