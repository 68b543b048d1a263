// src/store/mod.rs
//! Key-value storage contract used by the cache, the refresh lock and the
//! config override. Values are strings (JSON by convention); every write may
//! carry a TTL. Backends are assumed eventually consistent unless they
//! override [`KvStore::put_if_absent`] with an atomic version.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored value is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Write `value` only when `key` is currently absent. Returns whether the
    /// write happened. The default is a read followed by a write and is NOT
    /// atomic; strongly-consistent backends should override it.
    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.put(key, value, ttl).await?;
        Ok(true)
    }
}

pub type SharedStore = Arc<dyn KvStore>;

/// JSON convenience on top of any [`KvStore`].
#[async_trait]
pub trait KvStoreExt: KvStore {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.put(key, raw, ttl).await
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// Build the backend named by `STORE_BACKEND` (`memory` | `file`).
pub async fn open_backend(
    backend: &str,
    dir: &std::path::Path,
    clock: crate::clock::SharedClock,
) -> anyhow::Result<SharedStore> {
    match backend.to_ascii_lowercase().as_str() {
        "memory" | "" => Ok(Arc::new(MemoryStore::new(clock))),
        "file" => {
            let store = FileStore::open(dir, clock).await?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unsupported STORE_BACKEND `{other}` (expected memory|file)"),
    }
}
