//! HTTP client for downloading artifacts by presigned URL.

use crate::error::{CloudError, Result};
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for fetching whole objects from presigned URLs.
///
/// A failed request is reported once; there is no retry.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }

    /// GET `url` and return the body.
    #[instrument(skip(self, url), fields(host))]
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Ok(parsed) = reqwest::Url::parse(url) {
            tracing::Span::current().record("host", parsed.host_str().unwrap_or_default());
        }

        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CloudError::Network(format!(
                "HTTP {} fetching {}",
                status,
                redact(url)
            )));
        }

        let bytes = resp.bytes().await?;
        debug!(size = bytes.len(), "fetched object");
        Ok(bytes)
    }
}

/// Drop the query string, which carries the signature of a presigned URL.
pub(crate) fn redact(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}
