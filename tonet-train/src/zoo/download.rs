//! Weight downloads over HTTP.

use crate::error::TrainError;
use async_trait::async_trait;

/// Fetches a remote resource as raw bytes. Implementations do not retry.
#[async_trait]
pub trait WeightFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TrainError>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WeightFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TrainError> {
        tracing::info!(url, "Downloading pretrained weights");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TrainError::resource(format!("GET {url} failed: {e}")))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TrainError::resource(format!("reading body of {url} failed: {e}")))?;
        tracing::info!(url, size_bytes = bytes.len(), "Download complete");
        Ok(bytes.to_vec())
    }
}
