// tests/e2e_smoke.rs
// Whole-service wiring as the binary does it, with feeds served from
// tests/fixtures instead of the network.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::path::PathBuf;
use tower::ServiceExt; // for `oneshot` (tower 0.5 with features=["util"])

use zimnews::config::Settings;
use zimnews::store::open_backend;

async fn get_json(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn smoke_fixture_mode_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        // the repo's config/feeds.toml: twelve sources, three with fixtures
        feeds_config_path: Some(PathBuf::from("config/feeds.toml")),
        store_backend: "file".to_string(),
        store_dir: dir.path().to_path_buf(),
        fixture_dir: Some(PathBuf::from("tests/fixtures")),
        scheduler_enabled: false,
        ..Settings::default()
    };
    let clock = zimnews::clock::system();
    let store = open_backend(&settings.store_backend, &settings.store_dir, clock.clone())
        .await
        .expect("open file store");
    let fetcher = zimnews::build_fetcher(&settings).expect("fixture fetcher");
    let app = zimnews::router(zimnews::build_state(&settings, store, fetcher, clock));

    let (status, v) = get_json(&app, "POST", "/api/admin/force-refresh").await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["success"], true);
    assert_eq!(v["articlesLoaded"], 5);
    assert_eq!(v["failedSources"], 9);

    let (status, v) = get_json(&app, "GET", "/api/feeds?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "ready");
    assert_eq!(v["total"], 5);

    let (_, v) = get_json(&app, "GET", "/api/admin/status").await;
    assert_eq!(v["articleCount"], 5);
    let failed = v["lastReport"]["failed"].as_array().expect("failed list");
    assert!(failed
        .iter()
        .all(|f| f["reason"].as_str().unwrap_or_default().starts_with("no fixture")));
}
