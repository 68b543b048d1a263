// src/ingest/fetcher.rs
//! Per-source feed download. A fetcher never panics or propagates past its
//! boundary: every failure comes back as a [`FetchError`] for that source only.

use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::time::Duration;

use crate::ingest::config::SourceConfig;

pub const USER_AGENT: &str = concat!(
    "ZimNewsAggregator/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/zimnews/zimnews)"
);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
/// Bodies shorter than this cannot hold a feed.
pub const MIN_BODY_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("http status {0}")]
    Status(u16),
    #[error("body too short ({0} bytes)")]
    TooShort(usize),
    #[error("transport: {0}")]
    Transport(String),
    #[error("no fixture for source {0}")]
    Missing(String),
}

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Raw feed document for one source.
    async fn fetch(&self, source: &SourceConfig) -> Result<String, FetchError>;
}

fn check_body(body: String) -> Result<String, FetchError> {
    if body.trim().len() < MIN_BODY_BYTES {
        return Err(FetchError::TooShort(body.trim().len()));
    }
    Ok(body)
}

pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<String, FetchError> {
        let res = self
            .client
            .get(&source.url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5",
            )
            .send()
            .await;

        let resp = match res {
            Ok(r) => r,
            Err(e) => {
                counter!("ingest_fetch_errors_total").increment(1);
                if e.is_timeout() {
                    return Err(FetchError::Timeout(self.timeout));
                }
                return Err(FetchError::Transport(e.to_string()));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            counter!("ingest_fetch_errors_total").increment(1);
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;
        check_body(body)
    }
}

/// Serves feed bodies from memory, keyed by source id.
#[derive(Debug, Clone, Default)]
pub struct FixtureFetcher {
    bodies: HashMap<String, String>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source_id: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(source_id.into(), body.into());
        self
    }

    /// Every `<source_id>.xml` file in `dir`.
    pub fn from_dir(dir: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let mut out = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading fixture dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("xml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("reading fixture {}", path.display()))?;
            out.bodies.insert(id, body);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[async_trait]
impl FeedFetcher for FixtureFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<String, FetchError> {
        match self.bodies.get(&source.id) {
            Some(b) => check_body(b.clone()),
            None => Err(FetchError::Missing(source.id.clone())),
        }
    }
}
