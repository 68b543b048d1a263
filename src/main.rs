//! Zimbabwe news aggregator: binary entrypoint.
//! Boots the Axum HTTP server, wires store, scheduler and routes.

use shuttle_axum::ShuttleAxum;

use zimnews::clock;
use zimnews::config::Settings;
use zimnews::metrics::Metrics;
use zimnews::store::open_backend;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    zimnews::init_tracing();

    let settings = Settings::from_env()?;
    let clock = clock::system();

    let store = open_backend(&settings.store_backend, &settings.store_dir, clock.clone()).await?;
    let fetcher = zimnews::build_fetcher(&settings)?;
    let state = zimnews::build_state(&settings, store, fetcher, clock);

    if settings.scheduler_enabled {
        state.scheduler.spawn_periodic();
    } else {
        tracing::info!(target: "scheduler", "periodic scheduler disabled; lazy refresh only");
    }

    let metrics = Metrics::init(settings.refresh_interval.as_secs(), settings.max_articles)?;
    let router = zimnews::router(state).merge(metrics.router());

    tracing::info!(
        backend = %settings.store_backend,
        refresh_secs = settings.refresh_interval.as_secs(),
        "zimnews ready"
    );
    Ok(router.into())
}
