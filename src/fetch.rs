//! Image fetching: normalise a stored image location to raw bytes.
//!
//! Receipt photos live in object storage; the worker only ever sees a
//! location string. The seam is a trait so tests can hand bytes straight
//! to the worker, while [`LocalOrHttpSource`] covers the two transports
//! the CLI and sidecar deployments actually use: a plain file path and an
//! HTTP(S) URL (pre-signed object-storage links included).

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExtractError;

/// Resolves an image location to its bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, ExtractError>;
}

/// Check if the location looks like a URL.
pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Fetches from the local filesystem or over HTTP(S).
pub struct LocalOrHttpSource {
    client: reqwest::Client,
}

impl LocalOrHttpSource {
    pub fn new(timeout_secs: u64) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::Internal(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for LocalOrHttpSource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, ExtractError> {
        if is_url(location) {
            let response = self
                .client
                .get(location)
                .send()
                .await
                .map_err(|e| ExtractError::Storage(format!("download '{location}': {e}")))?;
            if !response.status().is_success() {
                return Err(ExtractError::Storage(format!(
                    "download '{location}': HTTP {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ExtractError::Storage(format!("download '{location}': {e}")))?;
            debug!(location, bytes = bytes.len(), "image downloaded");
            Ok(bytes.to_vec())
        } else {
            let bytes = tokio::fs::read(location)
                .await
                .map_err(|e| ExtractError::Storage(format!("read '{location}': {e}")))?;
            debug!(location, bytes = bytes.len(), "image read from disk");
            Ok(bytes)
        }
    }
}
