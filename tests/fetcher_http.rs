// tests/fetcher_http.rs
// HttpFetcher against a local mock server.

mod common;

use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{source, HERALD_XML};
use zimnews::ingest::config::SourceConfig;
use zimnews::ingest::fetcher::{FeedFetcher, FetchError, HttpFetcher};

fn pointed_at(server: &MockServer, p: &str) -> SourceConfig {
    SourceConfig {
        url: format!("{}{p}", server.uri()),
        ..source("herald", "The Herald", true)
    }
}

#[tokio::test]
async fn ok_feed_body_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(header_exists("user-agent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(HERALD_XML),
        )
        .expect(1)
        .mount(&server)
        .await;

    let f = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let body = f.fetch(&pointed_at(&server, "/feed")).await.unwrap();
    assert!(body.contains("Budget Speech 2024"));
}

#[tokio::test]
async fn non_success_status_is_a_source_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;

    let f = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let err = f.fetch(&pointed_at(&server, "/feed")).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(500)), "{err}");
}

#[tokio::test]
async fn short_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<rss></rss>"))
        .mount(&server)
        .await;

    let f = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let err = f.fetch(&pointed_at(&server, "/feed")).await.unwrap_err();
    assert!(matches!(err, FetchError::TooShort(11)), "{err}");
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(HERALD_XML)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let f = HttpFetcher::new(Duration::from_millis(300)).unwrap();
    let err = f.fetch(&pointed_at(&server, "/feed")).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout(_)), "{err}");
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let src = SourceConfig {
        url: "http://127.0.0.1:9/feed".to_string(),
        ..source("dead", "Dead", false)
    };
    let f = HttpFetcher::new(Duration::from_secs(2)).unwrap();
    let err = f.fetch(&src).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Transport(_) | FetchError::Timeout(_)),
        "{err}"
    );
}
