#[cfg(feature = "ehttp")]
pub mod ehttp;

#[cfg(feature = "fs")]
pub mod file;

#[cfg(feature = "reqwest")]
pub mod reqwest;

#[cfg(all(feature = "fs", feature = "reqwest"))]
pub mod hybrid;

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Transport used to fetch manifests, hierarchy blocks and node payloads.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError>;

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let end = offset
            .checked_add(length as u64)
            .and_then(|v| v.checked_sub(1))
            .ok_or_else(|| ResourceError::Other("Invalid range".into()))?;
        let range_value = format!("bytes={}-{}", offset, end);

        let mut all_headers = headers.unwrap_or_default();
        all_headers.insert("Range".to_string(), range_value);

        self.get(url, Some(all_headers)).await
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<T, ResourceError> {
        let bytes = self.get(url, headers).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl<C: ResourceClient> ResourceClient for Arc<C> {
    async fn get(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get(url, headers).await
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get_range(url, offset, length, headers).await
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<T, ResourceError> {
        (**self).get_json(url, headers).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected HTTP status code: {0}")]
    Status(u16),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),

    #[error("Unsupported scheme: {0}")]
    Unsupported(String),
}

/// Fails with [`ResourceError::Status`] outside the 2xx range.
pub(crate) fn check_status(status: u16) -> Result<(), ResourceError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ResourceError::Status(status))
    }
}
