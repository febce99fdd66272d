use std::pin::Pin;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_core::Stream;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// `None` for deletions, including lease expiry.
    pub value: Option<Vec<u8>>,
    pub revision: u64,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Cluster metadata store holding node heartbeats and deployed-model records.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64>;
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>>;
    async fn delete(&self, key: &str) -> Result<u64>;
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>, u64)>>;

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<(bool, u64)>;

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream>;
}

/// Typed JSON helpers over any [`MetaStore`].
#[async_trait]
pub trait MetaStoreExt: MetaStore {
    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl_ms: Option<u64>) -> Result<u64> {
        let bytes = serde_json::to_vec(value).with_context(|| format!("encode {key}"))?;
        self.put(key, bytes, ttl_ms).await
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some((bytes, _)) => {
                let v = serde_json::from_slice(&bytes).with_context(|| format!("decode {key}"))?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    /// Entries that fail to decode are skipped.
    async fn list_json<T: DeserializeOwned + Send>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let mut out = Vec::new();
        for (key, bytes, _) in self.list_prefix(prefix).await? {
            match serde_json::from_slice(&bytes) {
                Ok(v) => out.push((key, v)),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping undecodable meta entry"),
            }
        }
        Ok(out)
    }
}

impl<S: MetaStore + ?Sized> MetaStoreExt for S {}
