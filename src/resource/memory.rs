use super::{ResourceClient, ResourceError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

/// Serves resources from memory, keyed by full URL. Missing URLs answer 404.
///
/// Useful for embedding small datasets and for driving the loader in tests.
#[derive(Debug, Default)]
pub struct MemoryClient {
    resources: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), bytes);
    }

    pub fn remove(&self, url: &str) -> Option<Vec<u8>> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url)
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, ResourceError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or(ResourceError::Status(404))
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(
        &self,
        url: &str,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        self.fetch(url)
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: usize,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<Vec<u8>, ResourceError> {
        let bytes = self.fetch(url)?;
        let start = offset as usize;
        let end = start.saturating_add(length);
        bytes
            .get(start..end)
            .map(<[u8]>::to_vec)
            // Range Not Satisfiable
            .ok_or(ResourceError::Status(416))
    }
}
