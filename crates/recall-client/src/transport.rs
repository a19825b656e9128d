//! Transport to the remote authority.
//!
//! [`Transport`] is the seam between the sync engine and the network.
//! [`HttpTransport`] posts to `<base>/api/sync` with `reqwest`; tests plug in
//! an in-process authority instead.

use std::time::Duration;

use async_trait::async_trait;
use recall_core::{SyncRequest, SyncResponse};
use thiserror::Error;

/// Header naming the account on the authority.
pub const ACCOUNT_HEADER: &str = "X-Account-Id";

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No connectivity: connect failure or timeout. Sets the device offline.
    #[error("authority unreachable: {0}")]
    Unreachable(String),

    /// The authority answered with a non-success status.
    #[error("authority returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not a sync response.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// The HTTP client could not be built from the local configuration.
    #[error("http client setup failed: {0}")]
    Setup(String),
}

impl TransportError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }
}

/// Delivers one sync request and returns the authority's answer.
#[async_trait(?Send)]
pub trait Transport {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError>;
}

/// JSON over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    account: Option<String>,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: &str, account: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Setup(err.to_string()))?;
        Ok(HttpTransport {
            client,
            endpoint: format!("{}/api/sync", base_url.trim_end_matches('/')),
            account,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(account) = &self.account {
            req = req.header(ACCOUNT_HEADER, account);
        }

        let response = req.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() || err.is_request() {
                TransportError::Unreachable(err.to_string())
            } else {
                TransportError::Decode(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<SyncResponse>()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))
    }
}
