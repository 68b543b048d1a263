// src/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{KvStore, StoreError};
use crate::clock::SharedClock;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local store. TTLs are evaluated lazily against the injected clock.
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live (non-expired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.values().filter(|e| !is_expired(e, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| self.clock.now() + t)
    }
}

fn is_expired(e: &Entry, now: DateTime<Utc>) -> bool {
    e.expires_at.is_some_and(|at| at <= now)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match map.get(key) {
            Some(e) if is_expired(e, now) => {
                map.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = self.expiry(ttl);
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(key);
        Ok(())
    }

    // Check and insert under one guard.
    async fn put_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if map.get(key).is_some_and(|e| !is_expired(e, now)) {
            return Ok(false);
        }
        map.insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::KvStoreExt;
    use std::sync::Arc;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (clock.clone(), MemoryStore::new(clock))
    }

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let (clock, kv) = store();
        kv.put("k", "v".into(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn put_if_absent_respects_live_and_expired_keys() {
        let (clock, kv) = store();
        assert!(kv
            .put_if_absent("lock", "a".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap());
        assert!(!kv
            .put_if_absent("lock", "b".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap());

        clock.advance(chrono::Duration::seconds(11));
        assert!(kv
            .put_if_absent("lock", "c".into(), None)
            .await
            .unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn json_helpers_roundtrip_and_report_bad_json() {
        let (_clock, kv) = store();
        kv.put_json("n", &vec![1, 2, 3], None).await.unwrap();
        let back: Option<Vec<i32>> = kv.get_json("n").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        kv.put("bad", "{not json".into(), None).await.unwrap();
        let err = kv.get_json::<Vec<i32>>("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Serde(_)));
    }
}
