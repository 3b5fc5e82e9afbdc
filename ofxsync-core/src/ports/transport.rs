//! Transport port - delivers request documents to an institution

use async_trait::async_trait;

use crate::domain::result::Result;

/// Posts a request document and returns the raw response body
///
/// Implementations report connection failures as `Error::Network` and
/// deadline overruns as `Error::Timeout`, and do not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, document: &str) -> Result<String>;
}
