// src/api.rs
//! HTTP surface: feed listing, search, categories and admin operations.
//!
//! The read path never fails on staleness or an empty cache: it answers
//! `status: "initializing"` (with `Retry-After`) and kicks off a background
//! refresh. Only admin routes surface store or pipeline errors.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::cache::{CacheMeta, CacheStore};
use crate::clock::SharedClock;
use crate::config::CachedConfig;
use crate::ingest::scheduler::{RefreshOutcome, Scheduler};
use crate::ingest::sort_articles;
use crate::ingest::types::{Article, CATCH_ALL_CATEGORY};
use crate::ingest::PipelineReport;
use crate::lock::{LockRecord, RefreshLock};
use crate::store::StoreError;

pub const RETRY_AFTER_SECS: u64 = 30;
pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub cache: CacheStore,
    pub scheduler: Scheduler,
    pub config: CachedConfig,
    pub clock: SharedClock,
    pub admin_api_key: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/feeds", get(get_feeds))
        .route("/api/search", get(search))
        .route("/api/categories", get(categories))
        .route("/api/admin/force-refresh", post(admin_force_refresh))
        .route("/api/admin/clear-cache", post(admin_clear_cache))
        .route("/api/admin/status", get(admin_status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------- errors ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Conflict,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: ErrorCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "store unavailable");
        ApiError::unavailable(err.to_string())
    }
}

// ---------- query vocabulary ----------

/// Category filter from the query string. Distinct from the catch-all
/// category stored on articles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    Any,
    Uncategorized,
    Is(String),
}

impl CategoryFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()) {
            None => CategoryFilter::Any,
            Some(s) if s.is_empty() || s == "all" => CategoryFilter::Any,
            Some(s) if s == "uncategorized" => CategoryFilter::Uncategorized,
            Some(s) => CategoryFilter::Is(s),
        }
    }

    pub fn matches(&self, a: &Article) -> bool {
        match self {
            CategoryFilter::Any => true,
            CategoryFilter::Uncategorized => a.category == CATCH_ALL_CATEGORY,
            CategoryFilter::Is(c) => a.category.eq_ignore_ascii_case(c),
        }
    }

    fn cache_key(&self) -> &str {
        match self {
            CategoryFilter::Any => "all",
            CategoryFilter::Uncategorized => "uncategorized",
            CategoryFilter::Is(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Latest,
    Oldest,
    Relevance,
    Priority,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("oldest") => SortOrder::Oldest,
            Some("relevance") => SortOrder::Relevance,
            Some("priority") => SortOrder::Priority,
            _ => SortOrder::Latest,
        }
    }

    pub fn apply(self, articles: &mut [Article]) {
        match self {
            SortOrder::Latest => articles.sort_by(|a, b| b.pub_date.cmp(&a.pub_date)),
            SortOrder::Oldest => articles.sort_by(|a, b| a.pub_date.cmp(&b.pub_date)),
            SortOrder::Relevance => articles.sort_by(|a, b| {
                b.relevance_score
                    .cmp(&a.relevance_score)
                    .then_with(|| b.pub_date.cmp(&a.pub_date))
            }),
            SortOrder::Priority => sort_articles(articles),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
    #[default]
    All,
}

impl Timeframe {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("1h") | Some("hour") => Timeframe::Hour,
            Some("24h") | Some("today") | Some("day") => Timeframe::Day,
            Some("7d") | Some("week") => Timeframe::Week,
            Some("30d") | Some("month") => Timeframe::Month,
            _ => Timeframe::All,
        }
    }

    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let span = match self {
            Timeframe::Hour => chrono::Duration::hours(1),
            Timeframe::Day => chrono::Duration::hours(24),
            Timeframe::Week => chrono::Duration::days(7),
            Timeframe::Month => chrono::Duration::days(30),
            Timeframe::All => return None,
        };
        Some(now - span)
    }
}

/// Every whitespace-separated term must appear in title, description,
/// keywords or source name.
pub fn matches_search(a: &Article, query: &str) -> bool {
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
        return true;
    }
    let hay = format!(
        "{} {} {} {}",
        a.title,
        a.description,
        a.keywords.join(" "),
        a.source
    )
    .to_lowercase();
    terms.iter().all(|t| hay.contains(t.as_str()))
}

fn clamp_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT)
}

// ---------- /api/feeds ----------

#[derive(Debug, Default, Deserialize)]
pub struct FeedsQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub timeframe: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedsResponse {
    pub success: bool,
    pub articles: Vec<Article>,
    pub total: usize,
    pub total_cached: usize,
    pub status: &'static str,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

fn initializing(state: &AppState) -> Response {
    let started = state.scheduler.trigger_lazy();
    tracing::info!(lazy_refresh_started = started, "cache empty; answering initializing");
    let body = FeedsResponse {
        success: true,
        articles: Vec::new(),
        total: 0,
        total_cached: 0,
        status: "initializing",
        has_more: false,
        last_refresh: None,
        message: Some("News feeds are loading, please retry shortly"),
    };
    let mut resp = Json(body).into_response();
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
    resp
}

/// Snapshot articles, or `None` when the cache is empty or unreadable.
async fn load_articles(state: &AppState) -> Option<(Vec<Article>, Option<CacheMeta>)> {
    match state.cache.get_snapshot().await {
        Ok(Some(s)) => Some((s.articles, s.meta)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "snapshot read failed; serving initializing");
            None
        }
    }
}

async fn get_feeds(State(state): State<AppState>, Query(q): Query<FeedsQuery>) -> Response {
    let Some((articles, meta)) = load_articles(&state).await else {
        return initializing(&state);
    };

    let category = CategoryFilter::parse(q.category.as_deref());
    let cutoff = Timeframe::parse(q.timeframe.as_deref()).cutoff(state.clock.now());
    let search = q.search.as_deref().unwrap_or_default();
    let limit = clamp_limit(q.limit.as_deref());
    let offset = q
        .offset
        .as_deref()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let total_cached = articles.len();
    let mut filtered: Vec<Article> = articles
        .into_iter()
        .filter(|a| category.matches(a))
        .filter(|a| cutoff.map_or(true, |c| a.pub_date >= c))
        .filter(|a| matches_search(a, search))
        .collect();
    SortOrder::parse(q.sort.as_deref()).apply(&mut filtered);

    let total = filtered.len();
    let page: Vec<Article> = filtered.into_iter().skip(offset).take(limit).collect();
    let has_more = offset + page.len() < total;

    Json(FeedsResponse {
        success: true,
        articles: page,
        total,
        total_cached,
        status: "ready",
        has_more,
        last_refresh: meta.map(|m| m.last_refresh),
        message: None,
    })
    .into_response()
}

// ---------- /api/search ----------

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub articles: Vec<Article>,
    pub total: usize,
    pub cached: bool,
}

async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Result<Response, ApiError> {
    let query = q.q.as_deref().map(str::trim).unwrap_or_default().to_string();
    if query.is_empty() {
        return Err(ApiError::bad_request("missing search query `q`"));
    }
    let category = CategoryFilter::parse(q.category.as_deref());
    let limit = clamp_limit(q.limit.as_deref());

    match state.cache.get_search(&query, category.cache_key(), limit).await {
        Ok(Some(hits)) => {
            return Ok(Json(SearchResponse {
                success: true,
                query,
                total: hits.len(),
                articles: hits,
                cached: true,
            })
            .into_response())
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "search cache read failed"),
    }

    let Some((articles, _)) = load_articles(&state).await else {
        return Ok(initializing(&state));
    };
    let mut hits: Vec<Article> = articles
        .into_iter()
        .filter(|a| category.matches(a))
        .filter(|a| matches_search(a, &query))
        .collect();
    SortOrder::Relevance.apply(&mut hits);
    hits.truncate(limit);

    if let Err(e) = state
        .cache
        .put_search(&query, category.cache_key(), limit, &hits)
        .await
    {
        tracing::debug!(error = %e, "search cache write failed");
    }

    Ok(Json(SearchResponse {
        success: true,
        query,
        total: hits.len(),
        articles: hits,
        cached: false,
    })
    .into_response())
}

// ---------- /api/categories ----------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub id: String,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoriesResponse {
    pub success: bool,
    pub categories: Vec<CategoryCount>,
    pub uncategorized: usize,
}

async fn categories(State(state): State<AppState>) -> Result<Json<CategoriesResponse>, ApiError> {
    let configured = state
        .config
        .categories()
        .await
        .map_err(|e| ApiError::unavailable(format!("{e:#}")))?;
    let articles = load_articles(&state)
        .await
        .map(|(a, _)| a)
        .unwrap_or_default();

    let categories = configured
        .into_iter()
        .map(|c| CategoryCount {
            count: articles.iter().filter(|a| a.category == c.id).count(),
            id: c.id,
            name: c.name,
        })
        .collect();
    Ok(Json(CategoriesResponse {
        success: true,
        categories,
        uncategorized: articles.iter().filter(|a| a.is_uncategorized()).count(),
    }))
}

// ---------- admin ----------

fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::unauthorized("admin key required")),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceRefreshResponse {
    pub success: bool,
    pub articles_loaded: usize,
    pub failed_sources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn admin_force_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ForceRefreshResponse>, ApiError> {
    check_admin(&state, &headers)?;
    tracing::info!("admin force-refresh");
    match state.scheduler.force_refresh().await {
        RefreshOutcome::Refreshed {
            articles,
            failed_sources,
        } => Ok(Json(ForceRefreshResponse {
            success: true,
            articles_loaded: articles,
            failed_sources,
            message: None,
        })),
        RefreshOutcome::Empty { failed_sources } => Ok(Json(ForceRefreshResponse {
            success: false,
            articles_loaded: 0,
            failed_sources,
            message: Some("no articles fetched; previous snapshot kept".to_string()),
        })),
        RefreshOutcome::LockBusy => Err(ApiError::conflict("another refresh acquired the lock first")),
        RefreshOutcome::NotDue => Err(ApiError::internal("refresh skipped")),
        RefreshOutcome::StoreUnavailable(msg) => Err(ApiError::unavailable(msg)),
        RefreshOutcome::Failed(msg) => Err(ApiError::internal(msg)),
    }
}

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub success: bool,
    pub message: &'static str,
}

async fn admin_clear_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClearCacheResponse>, ApiError> {
    check_admin(&state, &headers)?;
    state.cache.clear().await?;
    state.config.invalidate().await;
    tracing::info!("admin cleared cache");
    Ok(Json(ClearCacheResponse {
        success: true,
        message: "cache cleared",
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub article_count: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_scheduled_run: Option<DateTime<Utc>>,
    pub last_cron_run: Option<DateTime<Utc>>,
    /// Periodic trigger ran within twice its interval.
    pub scheduler_healthy: bool,
    pub lock_held: bool,
    pub lock: Option<LockRecord>,
    pub refresh_due: bool,
    pub last_report: Option<PipelineReport>,
}

async fn admin_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    check_admin(&state, &headers)?;
    let now = state.clock.now();
    let meta = state.cache.get_metadata().await?;
    let last_cron_run = state.cache.last_cron_run().await?;
    let lock = state.scheduler.lock().holder().await?;

    let window = chrono::Duration::from_std(state.scheduler.cfg().cron_interval * 2)
        .unwrap_or(chrono::Duration::zero());
    let scheduler_healthy = last_cron_run.is_some_and(|at| now - at <= window);

    Ok(Json(StatusResponse {
        success: true,
        article_count: meta.as_ref().map(|m| m.count).unwrap_or(0),
        last_refresh: meta.map(|m| m.last_refresh),
        last_scheduled_run: state.cache.last_scheduled_run().await?,
        last_cron_run,
        scheduler_healthy,
        lock_held: lock.is_some(),
        lock,
        refresh_due: state.scheduler.is_due().await?,
        last_report: state.cache.last_report().await?,
    }))
}
