// src/store/file.rs
//! Directory-backed store: one JSON envelope per key, replaced via
//! write-to-temp + rename so readers never observe a half-written value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

use super::{KvStore, StoreError};
use crate::clock::SharedClock;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    key: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    value: String,
}

pub struct FileStore {
    dir: PathBuf,
    clock: SharedClock,
    // Serializes check-and-write in `put_if_absent` for this process.
    create_gate: Mutex<()>,
}

impl FileStore {
    /// Create the directory if needed. Failing here is a service-initialization
    /// failure: nothing works without the cache.
    pub async fn open(dir: &Path, clock: SharedClock) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).await.map_err(|e| {
            StoreError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            clock,
            create_gate: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(68);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut name, "{:02x}", b);
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let env: Envelope = serde_json::from_str(&raw)?;
        if env.expires_at.is_some_and(|at| at <= self.clock.now()) {
            // Expired; drop it lazily.
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(env.value))
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| self.clock.now() + t);
        let env = Envelope {
            key: key.to_string(),
            expires_at,
            value,
        };
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, serde_json::to_vec(&env)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic among callers sharing this handle. `get` drops expired
    /// envelopes, so an expired value counts as absent.
    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let _gate = self.create_gate.lock().await;
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.put(key, value, ttl).await?;
        Ok(true)
    }
}
