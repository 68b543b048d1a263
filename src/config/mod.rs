// src/config/mod.rs
//! Process settings and the feed-configuration providers.
//!
//! `Settings` is read once from the environment. Feed configuration is read
//! through a [`ConfigProvider`]; [`CachedConfig`] memoizes it for a TTL measured
//! on the injected clock.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::clock::SharedClock;
use crate::ingest::config::{load_feeds_default, load_feeds_from, CategoryConfig, FeedsConfig};
use crate::ingest::PipelineLimits;
use crate::store::{KvStoreExt, SharedStore};

/// KV key holding a JSON `FeedsConfig` that overrides the file configuration.
pub const CONFIG_OVERRIDE_KEY: &str = "config:feeds";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Explicit feeds file; `None` walks the default lookup chain.
    pub feeds_config_path: Option<PathBuf>,
    pub store_backend: String,
    pub store_dir: PathBuf,
    pub refresh_interval: Duration,
    pub cron_interval: Duration,
    pub fetch_timeout: Duration,
    pub items_per_source: usize,
    pub max_articles: usize,
    pub config_cache_ttl: Duration,
    pub image_proxy_base: String,
    pub admin_api_key: Option<String>,
    pub scheduler_enabled: bool,
    /// Serve feeds from `<dir>/<source_id>.xml` instead of HTTP.
    pub fixture_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feeds_config_path: None,
            store_backend: "memory".to_string(),
            store_dir: PathBuf::from("data/store"),
            refresh_interval: Duration::from_secs(3600),
            cron_interval: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(15),
            items_per_source: 50,
            max_articles: 1000,
            config_cache_ttl: Duration::from_secs(300),
            image_proxy_base: "/api/image".to_string(),
            admin_api_key: None,
            scheduler_enabled: true,
            fixture_dir: None,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(v) => v
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {key}={v}: {e}")),
        None => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    let secs = env_parse::<u64>(key, default.as_secs())?;
    if secs == 0 {
        return Err(anyhow!("{key} must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env_opt(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {key}={v}: expected a boolean")),
        },
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            feeds_config_path: env_opt(crate::ingest::config::ENV_PATH).map(PathBuf::from),
            store_backend: env_opt("STORE_BACKEND").unwrap_or(d.store_backend),
            store_dir: env_opt("STORE_DIR").map(PathBuf::from).unwrap_or(d.store_dir),
            refresh_interval: env_secs("REFRESH_INTERVAL_SECS", d.refresh_interval)?,
            cron_interval: env_secs("CRON_INTERVAL_SECS", d.cron_interval)?,
            fetch_timeout: env_secs("FETCH_TIMEOUT_SECS", d.fetch_timeout)?,
            items_per_source: env_parse("ITEMS_PER_SOURCE", d.items_per_source)?.max(1),
            max_articles: env_parse("MAX_ARTICLES", d.max_articles)?.max(1),
            config_cache_ttl: Duration::from_secs(env_parse(
                "CONFIG_CACHE_TTL_SECS",
                d.config_cache_ttl.as_secs(),
            )?),
            image_proxy_base: env_opt("IMAGE_PROXY_BASE").unwrap_or(d.image_proxy_base),
            admin_api_key: env_opt("ADMIN_API_KEY"),
            scheduler_enabled: env_bool("SCHEDULER_ENABLED", d.scheduler_enabled)?,
            fixture_dir: env_opt("FEED_FIXTURES_DIR").map(PathBuf::from),
        })
    }

    pub fn limits(&self) -> PipelineLimits {
        PipelineLimits {
            items_per_source: self.items_per_source,
            max_articles: self.max_articles,
            fetch_timeout: self.fetch_timeout,
        }
    }
}

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn load(&self) -> Result<FeedsConfig>;
}

/// TOML/JSON file, or the default lookup chain when no path is set.
pub struct FileConfigProvider {
    path: Option<PathBuf>,
}

impl FileConfigProvider {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load(&self) -> Result<FeedsConfig> {
        match &self.path {
            Some(p) => load_feeds_from(p),
            None => load_feeds_default(),
        }
    }
}

/// A fixed configuration. Used by fixture mode and tests.
pub struct StaticConfigProvider(pub FeedsConfig);

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn load(&self) -> Result<FeedsConfig> {
        Ok(self.0.clone())
    }
}

/// Reads [`CONFIG_OVERRIDE_KEY`] from the store, falling back to `fallback`.
pub struct KvOverrideProvider {
    store: SharedStore,
    fallback: Arc<dyn ConfigProvider>,
}

impl KvOverrideProvider {
    pub fn new(store: SharedStore, fallback: Arc<dyn ConfigProvider>) -> Self {
        Self { store, fallback }
    }
}

#[async_trait]
impl ConfigProvider for KvOverrideProvider {
    async fn load(&self) -> Result<FeedsConfig> {
        let over: Option<FeedsConfig> = self
            .store
            .get_json(CONFIG_OVERRIDE_KEY)
            .await
            .context("reading config override")?;
        match over {
            Some(cfg) => Ok(cfg.cleaned()),
            None => self.fallback.load().await,
        }
    }
}

/// TTL memo around a provider. Cheap to clone.
#[derive(Clone)]
pub struct CachedConfig {
    inner: Arc<dyn ConfigProvider>,
    ttl: chrono::Duration,
    clock: SharedClock,
    slot: Arc<RwLock<Option<(DateTime<Utc>, Arc<FeedsConfig>)>>>,
}

impl CachedConfig {
    pub fn new(inner: Arc<dyn ConfigProvider>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            inner,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
            clock,
            slot: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get(&self) -> Result<Arc<FeedsConfig>> {
        let now = self.clock.now();
        if let Some((loaded_at, cfg)) = self.slot.read().await.as_ref() {
            if now - *loaded_at < self.ttl {
                return Ok(cfg.clone());
            }
        }
        let fresh = Arc::new(self.inner.load().await?);
        *self.slot.write().await = Some((now, fresh.clone()));
        tracing::debug!(sources = fresh.sources.len(), "feeds config loaded");
        Ok(fresh)
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    pub async fn categories(&self) -> Result<Vec<CategoryConfig>> {
        Ok(self.get().await?.categories.clone())
    }
}
