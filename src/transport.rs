//! Outbound delivery transport.
//!
//! The dispatcher never talks HTTP directly; it hands a [`DeliveryRequest`]
//! to a [`Transport`]. [`HttpTransport`] is the production implementation,
//! tests plug in scripted transports.
//!
//! Timeouts and cancellation belong to the transport. The dispatcher makes
//! exactly one attempt per record and does not retry.
//!
//! # Example
//!
//! ```rust,ignore
//! use bulker_dispatch::transport::HttpTransport;
//! use std::time::Duration;
//!
//! let transport = HttpTransport::new().with_timeout(Duration::from_secs(10));
//! ```

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for a single delivery
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the metrics metadata JSON
pub const METRICS_META_HEADER: &str = "metricsMeta";

/// Errors that can occur while delivering one record.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Transport-level HTTP failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport-level failure reported by a non-HTTP transport
    #[error("connection failed: {0}")]
    Connection(String),

    /// The gateway answered with a non-success status
    #[error("HTTP Error: {status} {reason} (table '{table}'): {body}")]
    Status {
        table: String,
        status: u16,
        reason: String,
        body: String,
    },

    /// Record could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint and table did not form a valid URL
    #[error("invalid delivery URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// One outbound POST.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub url: String,
    pub auth_token: String,
    /// Serialized metrics metadata, sent as [`METRICS_META_HEADER`]
    pub metrics_meta: String,
    /// Serialized record
    pub body: String,
}

/// What came back from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl DeliveryResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            reason,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The injected outbound capability.
///
/// Implementations must be `Send + Sync`; a single transport is shared by
/// every in-flight invocation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs (e.g. "http")
    fn name(&self) -> &str;

    /// Perform one POST and return the gateway's response, whatever its status.
    ///
    /// Only transport-level failures are errors here.
    async fn post(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, DeliveryError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client (reused for connection pooling)
    client: Client,

    /// Per-request timeout
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn post(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
        debug!(url = %request.url, bytes = request.body.len(), "Posting record");

        let response = self
            .client
            .post(&request.url)
            .timeout(self.timeout)
            .header(AUTHORIZATION, format!("Bearer {}", request.auth_token))
            .header(METRICS_META_HEADER, &request.metrics_meta)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        Ok(DeliveryResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}
