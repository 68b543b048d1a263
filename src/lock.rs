// src/lock.rs
//! Refresh lock over the KV store.
//!
//! Acquire writes a fresh token with `put_if_absent`, then reads the key back
//! and only claims the lock if the stored token is its own. On a backend with
//! an atomic `put_if_absent` this is exact; on an eventually-consistent one it
//! narrows the race to the replication window. The TTL reclaims locks from
//! holders that died mid-run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::SharedClock;
use crate::store::{KvStoreExt, SharedStore, StoreError};

pub const LOCK_KEY: &str = "news:refresh_lock";
pub const LOCK_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

#[async_trait]
pub trait RefreshLock: Send + Sync {
    /// `Some(token)` when this caller now holds the lock.
    async fn try_acquire(&self) -> Result<Option<String>, StoreError>;

    /// Releases only if the lock still carries `token`.
    async fn release(&self, token: &str) -> Result<(), StoreError>;

    async fn holder(&self) -> Result<Option<LockRecord>, StoreError>;

    async fn is_held(&self) -> Result<bool, StoreError> {
        Ok(self.holder().await?.is_some())
    }

    /// Unconditional removal, for operators recovering a stuck lock.
    async fn force_clear(&self) -> Result<(), StoreError>;
}

pub struct KvRefreshLock {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
}

impl KvRefreshLock {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            ttl: LOCK_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl RefreshLock for KvRefreshLock {
    async fn try_acquire(&self) -> Result<Option<String>, StoreError> {
        let record = LockRecord {
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: self.clock.now(),
        };
        let raw = serde_json::to_string(&record)?;
        if !self.store.put_if_absent(LOCK_KEY, raw, Some(self.ttl)).await? {
            tracing::debug!(target: "scheduler", "refresh lock busy");
            return Ok(None);
        }

        // Another writer may have raced the same empty slot.
        match self.holder().await? {
            Some(current) if current.token == record.token => Ok(Some(record.token)),
            _ => {
                tracing::info!(target: "scheduler", "refresh lock lost on verify");
                Ok(None)
            }
        }
    }

    async fn release(&self, token: &str) -> Result<(), StoreError> {
        match self.holder().await? {
            Some(current) if current.token == token => self.store.delete(LOCK_KEY).await,
            Some(_) => {
                tracing::warn!(target: "scheduler", "refresh lock now held by another run; not releasing");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn holder(&self) -> Result<Option<LockRecord>, StoreError> {
        self.store.get_json(LOCK_KEY).await
    }

    async fn force_clear(&self) -> Result<(), StoreError> {
        self.store.delete(LOCK_KEY).await
    }
}
