// src/cache.rs
//! Snapshot cache on top of the KV store.
//!
//! The snapshot is replaced wholesale. Data is written before metadata, so
//! `news:meta` never claims more articles than `news:articles` holds.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::clock::SharedClock;
use crate::ingest::types::Article;
use crate::ingest::PipelineReport;
use crate::store::{KvStoreExt, SharedStore, StoreError};

pub const KEY_ARTICLES: &str = "news:articles";
pub const KEY_META: &str = "news:meta";
pub const KEY_LAST_SCHEDULED_RUN: &str = "news:last_scheduled_run";
pub const KEY_LAST_CRON_RUN: &str = "news:last_cron_run";
pub const KEY_LAST_REPORT: &str = "news:last_report";
const SEARCH_PREFIX: &str = "search:";

pub const MAX_CACHED_ARTICLES: usize = 20_000;
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(14 * 24 * 3600);
pub const SEARCH_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    pub last_refresh: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub articles: Vec<Article>,
    pub meta: Option<CacheMeta>,
}

#[derive(Clone)]
pub struct CacheStore {
    store: SharedStore,
    clock: SharedClock,
}

impl CacheStore {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// `None` when nothing (or an empty list) is cached.
    pub async fn get_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let articles: Option<Vec<Article>> = self.store.get_json(KEY_ARTICLES).await?;
        let Some(articles) = articles.filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let meta = self.get_metadata().await?;
        Ok(Some(Snapshot { articles, meta }))
    }

    /// Newest first, capped at [`MAX_CACHED_ARTICLES`]. Returns the stored meta.
    pub async fn put_snapshot(&self, mut articles: Vec<Article>) -> Result<CacheMeta, StoreError> {
        articles.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        articles.truncate(MAX_CACHED_ARTICLES);

        let meta = CacheMeta {
            last_refresh: self.clock.now(),
            count: articles.len(),
        };
        self.store
            .put_json(KEY_ARTICLES, &articles, Some(SNAPSHOT_TTL))
            .await?;
        self.store.put_json(KEY_META, &meta, Some(SNAPSHOT_TTL)).await?;
        counter!("cache_snapshot_writes_total").increment(1);
        Ok(meta)
    }

    pub async fn get_metadata(&self) -> Result<Option<CacheMeta>, StoreError> {
        self.store.get_json(KEY_META).await
    }

    pub async fn last_scheduled_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.get_json(KEY_LAST_SCHEDULED_RUN).await
    }

    pub async fn set_last_scheduled_run(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.put_json(KEY_LAST_SCHEDULED_RUN, &at, None).await
    }

    pub async fn last_cron_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.get_json(KEY_LAST_CRON_RUN).await
    }

    pub async fn set_last_cron_run(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.store.put_json(KEY_LAST_CRON_RUN, &at, None).await
    }

    pub async fn last_report(&self) -> Result<Option<PipelineReport>, StoreError> {
        self.store.get_json(KEY_LAST_REPORT).await
    }

    pub async fn set_last_report(&self, report: &PipelineReport) -> Result<(), StoreError> {
        self.store
            .put_json(KEY_LAST_REPORT, report, Some(SNAPSHOT_TTL))
            .await
    }

    pub async fn get_search(
        &self,
        query: &str,
        category: &str,
        limit: usize,
    ) -> Result<Option<Vec<Article>>, StoreError> {
        let hit: Option<Vec<Article>> = self.store.get_json(&search_key(query, category, limit)).await?;
        match hit {
            Some(_) => counter!("cache_search_hits_total").increment(1),
            None => counter!("cache_search_misses_total").increment(1),
        }
        Ok(hit)
    }

    pub async fn put_search(
        &self,
        query: &str,
        category: &str,
        limit: usize,
        results: &[Article],
    ) -> Result<(), StoreError> {
        self.store
            .put_json(&search_key(query, category, limit), &results, Some(SEARCH_TTL))
            .await
    }

    /// Drops the snapshot and run bookkeeping. The lock and search entries
    /// are left alone.
    pub async fn clear(&self) -> Result<(), StoreError> {
        for key in [KEY_ARTICLES, KEY_META, KEY_LAST_SCHEDULED_RUN, KEY_LAST_REPORT] {
            self.store.delete(key).await?;
        }
        Ok(())
    }
}

pub fn search_key(query: &str, category: &str, limit: usize) -> String {
    let mut h = Sha256::new();
    h.update(query.trim().to_lowercase().as_bytes());
    h.update([0x1f]);
    h.update(category.trim().to_lowercase().as_bytes());
    h.update([0x1f]);
    h.update(limit.to_string().as_bytes());
    let digest = h.finalize();
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    format!("{SEARCH_PREFIX}{hex}")
}
