// tests/common/mod.rs
// Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::time::Duration;

use zimnews::ingest::config::{FeedsConfig, SourceConfig};
use zimnews::ingest::fetcher::{FeedFetcher, FetchError, FixtureFetcher};
use zimnews::store::{KvStore, StoreError};

pub const HERALD_XML: &str = include_str!("../fixtures/herald.xml");
pub const NEWSDAY_XML: &str = include_str!("../fixtures/newsday.xml");
pub const ZIMLIVE_XML: &str = include_str!("../fixtures/zimlive.xml");

pub fn source(id: &str, name: &str, priority: bool) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        name: name.to_string(),
        url: format!("https://feeds.test/{id}"),
        category: "general".to_string(),
        enabled: true,
        priority,
    }
}

/// Seed categories/keywords/trust list with three fixture-backed sources.
/// Newsday is listed first, but Herald is the priority source.
pub fn test_config() -> FeedsConfig {
    FeedsConfig {
        sources: vec![
            source("newsday", "NewsDay", false),
            source("herald", "The Herald", true),
            source("zimlive", "ZimLive", false),
        ],
        ..FeedsConfig::default_seed()
    }
}

pub fn fixtures() -> FixtureFetcher {
    FixtureFetcher::new()
        .with("herald", HERALD_XML)
        .with("newsday", NEWSDAY_XML)
        .with("zimlive", ZIMLIVE_XML)
}

/// Delays one source, then answers from fixtures.
pub struct SlowFetcher {
    pub inner: FixtureFetcher,
    pub slow_id: String,
    pub delay: Duration,
}

#[async_trait]
impl FeedFetcher for SlowFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<String, FetchError> {
        if source.id == self.slow_id {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.fetch(source).await
    }
}

/// Fails every source with a 503.
pub struct DownFetcher;

#[async_trait]
impl FeedFetcher for DownFetcher {
    async fn fetch(&self, _source: &SourceConfig) -> Result<String, FetchError> {
        Err(FetchError::Status(503))
    }
}

/// A KV binding that is down: every operation fails.
pub struct FailingStore;

fn down() -> StoreError {
    StoreError::Unavailable("kv binding unreachable".to_string())
}

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(down())
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<(), StoreError> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(down())
    }
}
