// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /api/feeds (initializing, filters, paging)
// - GET /api/search (validation, cache)
// - GET /api/categories
// - /api/admin/* (auth, status, clear-cache, force-refresh, scheduler health)
// - store outage: reads degrade to initializing, admin routes answer 503

mod common;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt as _; // for `oneshot`

use common::{fixtures, test_config, DownFetcher, FailingStore};
use zimnews::api::{self, AppState};
use zimnews::cache::CacheStore;
use zimnews::clock::{ManualClock, SharedClock};
use zimnews::config::{CachedConfig, StaticConfigProvider};
use zimnews::ingest::fetcher::FeedFetcher;
use zimnews::ingest::scheduler::{Scheduler, SchedulerCfg};
use zimnews::ingest::PipelineLimits;
use zimnews::lock::KvRefreshLock;
use zimnews::store::{MemoryStore, SharedStore};

const BODY_LIMIT: usize = 1024 * 1024;
const ADMIN_KEY: &str = "s3cret-admin";

fn state_on(
    clock: Arc<ManualClock>,
    store: SharedStore,
    fetcher: Arc<dyn FeedFetcher>,
    admin_key: Option<&str>,
) -> AppState {
    let clock: SharedClock = clock;
    let config = CachedConfig::new(
        Arc::new(StaticConfigProvider(test_config())),
        Duration::from_secs(300),
        clock.clone(),
    );
    let cache = CacheStore::new(store.clone(), clock.clone());
    let scheduler = Scheduler::new(
        cache.clone(),
        Arc::new(KvRefreshLock::new(store, clock.clone())),
        config.clone(),
        fetcher,
        clock.clone(),
        SchedulerCfg {
            refresh_interval: Duration::from_secs(3600),
            cron_interval: Duration::from_secs(3600),
            limits: PipelineLimits::default(),
            image_proxy_base: "/api/image".to_string(),
        },
    );
    AppState {
        cache,
        scheduler,
        config,
        clock,
        admin_api_key: admin_key.map(Arc::from),
    }
}

fn start_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2023, 12, 1, 6, 0, 0).unwrap()))
}

fn state_with(fetcher: Arc<dyn FeedFetcher>, admin_key: Option<&str>) -> AppState {
    let clock = start_clock();
    let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
    state_on(clock, store, fetcher, admin_key)
}

/// Router over fixture feeds with the snapshot already loaded.
async fn loaded_app(admin_key: Option<&str>) -> (Router, AppState) {
    let state = state_with(Arc::new(fixtures()), admin_key);
    state.scheduler.force_refresh().await;
    (api::router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, bearer: Option<&str>) -> (StatusCode, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let req = req.body(Body::empty()).expect("build request");
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v: Json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

fn titles(v: &Json) -> Vec<String> {
    v["articles"]
        .as_array()
        .expect("articles array")
        .iter()
        .map(|a| a["title"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = api::router(state_with(Arc::new(fixtures()), None));
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn empty_cache_answers_initializing_then_fills_lazily() {
    let app = api::router(state_with(Arc::new(fixtures()), None));

    let req = Request::builder()
        .uri("/api/feeds")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("retry-after").and_then(|v| v.to_str().ok()),
        Some("30")
    );
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["status"], "initializing");
    assert_eq!(v["success"], true);
    assert_eq!(v["articles"].as_array().map(Vec::len), Some(0));

    let mut ready = Json::Null;
    for _ in 0..100 {
        let (_, v) = call(&app, "GET", "/api/feeds", None).await;
        if v["status"] == "ready" {
            ready = v;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(ready["status"], "ready", "lazy refresh never landed");
    assert_eq!(ready["total"], 5);
    assert!(ready["lastRefresh"].is_string());
}

#[tokio::test]
async fn feeds_filters_sort_and_page() {
    let (app, _) = loaded_app(None).await;

    let (status, v) = call(&app, "GET", "/api/feeds", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "ready");
    assert_eq!(v["total"], 5);
    assert_eq!(v["totalCached"], 5);
    assert_eq!(titles(&v)[0], "Budget Speech 2024");
    let first = &v["articles"][0];
    assert_eq!(first["sourceId"], "herald");
    assert_eq!(first["optimizedImageUrl"].as_str().map(|u| u.starts_with("/api/image")), Some(true));

    let (_, v) = call(&app, "GET", "/api/feeds?category=economy", None).await;
    assert_eq!(
        titles(&v),
        vec!["Budget Speech 2024", "ZiG trades firmer against the US dollar"]
    );

    let (_, v) = call(&app, "GET", "/api/feeds?category=all", None).await;
    assert_eq!(v["total"], 5);
    let (_, v) = call(&app, "GET", "/api/feeds?category=uncategorized", None).await;
    assert_eq!(v["total"], 0);

    let (_, v) = call(&app, "GET", "/api/feeds?search=cholera%20harare", None).await;
    assert_eq!(titles(&v), vec!["Breaking: Cholera cases rise in Harare suburbs"]);

    // clock sits at 2023-12-01 06:00Z; the cabinet story is older than a day
    let (_, v) = call(&app, "GET", "/api/feeds?timeframe=24h", None).await;
    assert_eq!(v["total"], 4);
    assert!(!titles(&v).iter().any(|t| t.starts_with("Cabinet")));

    let (_, v) = call(&app, "GET", "/api/feeds?sort=oldest&limit=2", None).await;
    assert_eq!(titles(&v)[0], "Cabinet Reshuffle Announced!");
    assert_eq!(titles(&v).len(), 2);
    assert_eq!(v["hasMore"], true);

    let (_, v) = call(&app, "GET", "/api/feeds?sort=priority&limit=2&offset=4", None).await;
    assert_eq!(titles(&v), vec!["Cabinet Reshuffle Announced!"]);
    assert_eq!(v["hasMore"], false);

    let (_, v) = call(&app, "GET", "/api/feeds?limit=abc&sort=whatever", None).await;
    assert_eq!(v["total"], 5);
}

#[tokio::test]
async fn search_validates_and_caches() {
    let (app, _) = loaded_app(None).await;

    let (status, v) = call(&app, "GET", "/api/search", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["success"], false);
    assert_eq!(v["error"]["code"], "BAD_REQUEST");

    let (status, v) = call(&app, "GET", "/api/search?q=ZiG", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["cached"], false);
    assert_eq!(titles(&v), vec!["ZiG trades firmer against the US dollar"]);

    let (_, again) = call(&app, "GET", "/api/search?q=%20zig%20", None).await;
    assert_eq!(again["cached"], true);
    assert_eq!(again["articles"], v["articles"]);

    let (_, other) = call(&app, "GET", "/api/search?q=zig&category=sports", None).await;
    assert_eq!(other["cached"], false);
    assert_eq!(other["total"], 0);
}

#[tokio::test]
async fn categories_count_the_snapshot() {
    let (app, _) = loaded_app(None).await;
    let (status, v) = call(&app, "GET", "/api/categories", None).await;
    assert_eq!(status, StatusCode::OK);

    let count = |id: &str| {
        v["categories"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["id"] == id)
            .map(|c| c["count"].as_u64().unwrap())
    };
    assert_eq!(count("economy"), Some(2));
    assert_eq!(count("politics"), Some(1));
    assert_eq!(count("sports"), Some(1));
    assert_eq!(count("health"), Some(1));
    assert_eq!(count("agriculture"), Some(0));
    assert_eq!(count("all"), None);
    assert_eq!(v["uncategorized"], 0);
}

#[tokio::test]
async fn admin_routes_require_the_key() {
    let (app, _) = loaded_app(Some(ADMIN_KEY)).await;

    for (method, uri) in [
        ("GET", "/api/admin/status"),
        ("POST", "/api/admin/clear-cache"),
        ("POST", "/api/admin/force-refresh"),
    ] {
        let (status, v) = call(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(v["error"]["code"], "UNAUTHORIZED");
        let (status, _) = call(&app, method, uri, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }

    // public routes stay open
    let (status, _) = call(&app, "GET", "/api/feeds", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_status_clear_and_force_refresh() {
    let (app, _) = loaded_app(Some(ADMIN_KEY)).await;

    let (status, v) = call(&app, "GET", "/api/admin/status", Some(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["articleCount"], 5);
    assert_eq!(v["lockHeld"], false);
    assert_eq!(v["refreshDue"], false);
    assert_eq!(v["lastReport"]["duplicates"], 1);
    assert_eq!(v["lastReport"]["failed"].as_array().map(Vec::len), Some(0));

    let (status, v) = call(&app, "POST", "/api/admin/clear-cache", Some(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], true);

    let (_, v) = call(&app, "GET", "/api/admin/status", Some(ADMIN_KEY)).await;
    assert_eq!(v["articleCount"], 0);
    assert_eq!(v["refreshDue"], true);

    let (status, v) = call(&app, "POST", "/api/admin/force-refresh", Some(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], true);
    assert_eq!(v["articlesLoaded"], 5);
    assert_eq!(v["failedSources"], 0);

    let (_, v) = call(&app, "GET", "/api/feeds", None).await;
    assert_eq!(v["status"], "ready");
}

#[tokio::test]
async fn force_refresh_with_every_source_down_reports_failure() {
    let state = state_with(Arc::new(DownFetcher), None);
    let app = api::router(state);

    let (status, v) = call(&app, "POST", "/api/admin/force-refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], false);
    assert_eq!(v["articlesLoaded"], 0);
    assert_eq!(v["failedSources"], 3);
    assert!(v["message"].is_string());
}

#[tokio::test]
async fn scheduler_health_follows_the_cron_record() {
    let clock = start_clock();
    let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
    let state = state_on(clock.clone(), store, Arc::new(fixtures()), None);
    let app = api::router(state.clone());

    let (_, v) = call(&app, "GET", "/api/admin/status", None).await;
    assert_eq!(v["schedulerHealthy"], false, "no tick recorded yet");

    state.scheduler.run_if_due().await;
    let (_, v) = call(&app, "GET", "/api/admin/status", None).await;
    assert_eq!(v["schedulerHealthy"], true);
    assert!(v["lastCronRun"].is_string());

    // cron_interval is one hour; exactly two is still inside the window
    clock.advance(chrono::Duration::hours(2));
    let (_, v) = call(&app, "GET", "/api/admin/status", None).await;
    assert_eq!(v["schedulerHealthy"], true);

    clock.advance(chrono::Duration::seconds(1));
    let (_, v) = call(&app, "GET", "/api/admin/status", None).await;
    assert_eq!(v["schedulerHealthy"], false);
}

#[tokio::test]
async fn store_outage_degrades_reads_and_fails_admin_with_503() {
    let store: SharedStore = Arc::new(FailingStore);
    let app = api::router(state_on(start_clock(), store, Arc::new(fixtures()), None));

    let (status, v) = call(&app, "GET", "/api/feeds", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "initializing");
    assert_eq!(v["articles"].as_array().map(Vec::len), Some(0));

    let (status, v) = call(&app, "GET", "/api/search?q=zig", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "initializing");

    for (method, uri) in [
        ("GET", "/api/admin/status"),
        ("POST", "/api/admin/clear-cache"),
        ("POST", "/api/admin/force-refresh"),
    ] {
        let (status, v) = call(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}: {v}");
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "SERVICE_UNAVAILABLE");
    }

    let (status, _) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
