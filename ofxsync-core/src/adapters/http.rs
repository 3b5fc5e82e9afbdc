//! HTTP transport for OFX statement downloads
//!
//! Posts SGML request documents and hands back the response body. Institutions
//! report application errors inside the body, so non-success HTTP statuses are
//! logged and the body is still returned for the parser to inspect.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use url::Url;

use crate::domain::result::{Error, Result};
use crate::ports::Transport;

pub const OFX_CONTENT_TYPE: &str = "application/x-ofx";
pub const OFX_ACCEPT: &str = "*/*, application/x-ofx";

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    fn endpoint(url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::config(format!("invalid OFX endpoint '{}': {}", url, e)))?;
        match parsed.scheme() {
            "https" | "http" => Ok(parsed),
            other => Err(Error::config(format!(
                "unsupported OFX endpoint scheme '{}'",
                other
            ))),
        }
    }

    fn map_request_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout(format!(
                "no response within {} seconds",
                self.timeout.as_secs()
            ))
        } else if error.is_connect() {
            Error::Network(format!("unable to connect: {}", error))
        } else {
            Error::Network(format!("request failed: {}", error))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, document: &str) -> Result<String> {
        let endpoint = Self::endpoint(url)?;
        let host = endpoint.host_str().unwrap_or_default().to_string();

        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, OFX_CONTENT_TYPE)
            .header(ACCEPT, OFX_ACCEPT)
            // reqwest owns this copy of the document and does not wipe it
            .body(document.as_bytes().to_vec())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                host = %host,
                "institution returned non-success status"
            );
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_request_error(e))?;
        Ok(decode_ascii(&bytes))
    }
}

/// Decode as ASCII, dropping every other byte
pub fn decode_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_server::{MockConfig, MockOfxServer};

    #[test]
    fn test_decode_ascii_drops_other_bytes() {
        assert_eq!(decode_ascii(b"<NAME>Caf\xc3\xa9 Rio"), "<NAME>Caf Rio");
        assert_eq!(decode_ascii(&[0x80, 0xff, b'o', b'k']), "ok");
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(HttpTransport::endpoint("https://ofx.bank.test/ofx").is_ok());
        assert!(HttpTransport::endpoint("http://127.0.0.1:8080").is_ok());
        assert!(matches!(HttpTransport::endpoint("ftp://bank.test"), Err(Error::Config(_))));
        assert!(matches!(HttpTransport::endpoint("not a url"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_posts_document_with_ofx_headers() {
        let server = MockOfxServer::start(MockConfig {
            body: b"<OFX><BALAMT>1.00</OFX>".to_vec(),
            ..Default::default()
        })
        .unwrap();
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let body = transport
            .send(&server.base_url(), "OFXHEADER:100\r\n\r\n<OFX>\r\n</OFX>")
            .await
            .unwrap();
        assert_eq!(body, "<OFX><BALAMT>1.00</OFX>");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].header("content-type"), Some(OFX_CONTENT_TYPE));
        assert_eq!(requests[0].header("accept"), Some(OFX_ACCEPT));
        assert_eq!(requests[0].body, "OFXHEADER:100\r\n\r\n<OFX>\r\n</OFX>");
    }

    #[tokio::test]
    async fn test_non_success_status_still_returns_body() {
        let server = MockOfxServer::start(MockConfig {
            status: 500,
            body: b"<OFX><CODE>2000</OFX>".to_vec(),
            ..Default::default()
        })
        .unwrap();
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let body = transport.send(&server.base_url(), "<OFX>").await.unwrap();
        assert!(body.contains("<CODE>2000"));
    }

    #[tokio::test]
    async fn test_non_ascii_response_bytes_are_dropped() {
        let server = MockOfxServer::start(MockConfig {
            body: b"<NAME>Z\xfcrich \xe2\x82\xacStore".to_vec(),
            ..Default::default()
        })
        .unwrap();
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let body = transport.send(&server.base_url(), "<OFX>").await.unwrap();
        assert_eq!(body, "<NAME>Zrich Store");
    }

    #[tokio::test]
    async fn test_slow_server_is_a_timeout() {
        let server = MockOfxServer::start(MockConfig {
            delay_ms: 2_000,
            ..Default::default()
        })
        .unwrap();
        let transport = HttpTransport::new(Duration::from_millis(200)).unwrap();

        let err = transport.send(&server.base_url(), "<OFX>").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_network_error() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let err = transport
            .send(&format!("http://127.0.0.1:{}/ofx", port), "<OFX>")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(err.is_retryable());
    }
}
