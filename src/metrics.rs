// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish static refresh settings.
    pub fn init(refresh_interval_secs: u64, max_articles: usize) -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new().install_recorder()?;

        describe_counter!("scheduler_refresh_total", "Refresh attempts by outcome.");
        describe_counter!("cache_snapshot_writes_total", "Snapshots written to the store.");
        describe_counter!("cache_search_hits_total", "Search requests served from cache.");
        describe_counter!("cache_search_misses_total", "Search requests computed from the snapshot.");
        describe_gauge!("scheduler_last_refresh_ts", "Unix ts of the last successful refresh.");

        gauge!("scheduler_refresh_interval_secs").set(refresh_interval_secs as f64);
        gauge!("ingest_max_articles").set(max_articles as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
