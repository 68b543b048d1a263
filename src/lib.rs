// src/lib.rs
// Public library surface for integration tests (and the binary).

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod ingest;
pub mod lock;
pub mod metrics;
pub mod store;

pub use crate::api::router;

use std::sync::Arc;

use crate::api::AppState;
use crate::cache::CacheStore;
use crate::clock::SharedClock;
use crate::config::{CachedConfig, ConfigProvider, FileConfigProvider, KvOverrideProvider, Settings};
use crate::ingest::fetcher::{FeedFetcher, FixtureFetcher, HttpFetcher};
use crate::ingest::scheduler::{Scheduler, SchedulerCfg};
use crate::lock::KvRefreshLock;
use crate::store::SharedStore;

/// Structured logs via `RUST_LOG` (default `zimnews=info,warn`); JSON when
/// `LOG_FORMAT=json`. A no-op if a subscriber is already installed.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zimnews=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

/// Fetcher chosen by settings: fixture directory if set, HTTP otherwise.
pub fn build_fetcher(settings: &Settings) -> anyhow::Result<Arc<dyn FeedFetcher>> {
    match &settings.fixture_dir {
        Some(dir) => {
            let f = FixtureFetcher::from_dir(dir)?;
            tracing::info!(target: "ingest", fixtures = f.len(), dir = %dir.display(), "serving feeds from fixtures");
            Ok(Arc::new(f))
        }
        None => Ok(Arc::new(HttpFetcher::new(settings.fetch_timeout)?)),
    }
}

/// Wire store, cache, lock, config and scheduler into the router state.
pub fn build_state(
    settings: &Settings,
    store: SharedStore,
    fetcher: Arc<dyn FeedFetcher>,
    clock: SharedClock,
) -> AppState {
    let file_cfg: Arc<dyn ConfigProvider> =
        Arc::new(FileConfigProvider::new(settings.feeds_config_path.clone()));
    let provider: Arc<dyn ConfigProvider> =
        Arc::new(KvOverrideProvider::new(store.clone(), file_cfg));
    let config = CachedConfig::new(provider, settings.config_cache_ttl, clock.clone());

    let cache = CacheStore::new(store.clone(), clock.clone());
    let lock = Arc::new(KvRefreshLock::new(store, clock.clone()));
    let scheduler = Scheduler::new(
        cache.clone(),
        lock,
        config.clone(),
        fetcher,
        clock.clone(),
        SchedulerCfg {
            refresh_interval: settings.refresh_interval,
            cron_interval: settings.cron_interval,
            limits: settings.limits(),
            image_proxy_base: settings.image_proxy_base.clone(),
        },
    );

    AppState {
        cache,
        scheduler,
        config,
        clock,
        admin_api_key: settings.admin_api_key.as_deref().map(Arc::from),
    }
}
