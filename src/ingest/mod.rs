// src/ingest/mod.rs
pub mod classify;
pub mod config;
pub mod fetcher;
pub mod image;
pub mod normalize;
pub mod parser;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::ingest::classify::Classifier;
use crate::ingest::config::{FeedsConfig, SourceConfig};
use crate::ingest::fetcher::{FeedFetcher, FetchError};
use crate::ingest::image::TrustedDomains;
use crate::ingest::normalize::{normalize_item, title_key, NormalizeCtx};
use crate::ingest::types::{Article, SourceFailure, SourceSuccess};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Aggregation pipeline runs.");
        describe_counter!("ingest_items_total", "Items parsed from source feeds.");
        describe_counter!("ingest_articles_total", "Articles kept after dedup and truncation.");
        describe_counter!("ingest_rejected_total", "Items dropped by normalization (title/link).");
        describe_counter!("ingest_dedup_total", "Articles removed by title deduplication.");
        describe_counter!("ingest_source_failures_total", "Sources that contributed nothing.");
        describe_counter!("ingest_fetch_errors_total", "HTTP fetch errors.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("ingest_pipeline_ms", "Whole pipeline run time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when ingest pipeline last ran."
        );
    });
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineLimits {
    pub items_per_source: usize,
    pub max_articles: usize,
    pub fetch_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            items_per_source: 50,
            max_articles: 1000,
            fetch_timeout: fetcher::DEFAULT_TIMEOUT,
        }
    }
}

/// Result of one source within a run.
#[derive(Debug)]
pub enum SourceOutcome {
    Ok {
        report: SourceSuccess,
        articles: Vec<Article>,
        rejected: usize,
    },
    Failed(SourceFailure),
}

/// What a pipeline run produced, including which sources failed and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    #[serde(skip)]
    pub articles: Vec<Article>,
    pub article_count: usize,
    pub succeeded: Vec<SourceSuccess>,
    pub failed: Vec<SourceFailure>,
    pub duplicates: usize,
    pub rejected: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// Drop later articles whose normalized title was already seen.
/// Returns the number removed.
pub fn dedup_by_title(articles: &mut Vec<Article>) -> usize {
    let before = articles.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(before);
    articles.retain(|a| seen.insert(title_key(&a.title)));
    before - articles.len()
}

/// Priority desc, relevance desc, then newest first. Stable.
pub fn sort_articles(articles: &mut [Article]) {
    articles.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.relevance_score.cmp(&a.relevance_score))
            .then_with(|| b.pub_date.cmp(&a.pub_date))
    });
}

fn failure(source: &SourceConfig, reason: String) -> SourceOutcome {
    SourceOutcome::Failed(SourceFailure {
        source_id: source.id.clone(),
        source: source.name.clone(),
        reason,
    })
}

async fn run_source(
    fetcher: &dyn FeedFetcher,
    source: &SourceConfig,
    limits: &PipelineLimits,
    classifier: &Classifier,
    trusted: &TrustedDomains,
    image_proxy_base: &str,
    now: DateTime<Utc>,
) -> SourceOutcome {
    // A late result from a timed-out fetch is dropped with its future.
    let body = match tokio::time::timeout(limits.fetch_timeout, fetcher.fetch(source)).await {
        Err(_) => return failure(source, FetchError::Timeout(limits.fetch_timeout).to_string()),
        Ok(Err(e)) => return failure(source, e.to_string()),
        Ok(Ok(body)) => body,
    };

    let t0 = Instant::now();
    let items = match parser::parse(&body) {
        Ok(items) => items,
        Err(e) => return failure(source, format!("parse: {e}")),
    };
    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_items_total").increment(items.len() as u64);

    let ctx = NormalizeCtx {
        source,
        classifier,
        trusted,
        image_proxy_base,
        now,
    };
    let parsed = items.len();
    let articles: Vec<Article> = items
        .iter()
        .take(limits.items_per_source)
        .filter_map(|raw| normalize_item(raw, &ctx))
        .collect();
    let rejected = parsed.min(limits.items_per_source) - articles.len();

    SourceOutcome::Ok {
        report: SourceSuccess {
            source_id: source.id.clone(),
            source: source.name.clone(),
            parsed,
            accepted: articles.len(),
        },
        articles,
        rejected,
    }
}

/// Fetch every enabled source concurrently and build one snapshot.
/// Failing sources are reported, never raised.
pub async fn run_once(
    fetcher: &dyn FeedFetcher,
    cfg: &FeedsConfig,
    limits: &PipelineLimits,
    image_proxy_base: &str,
    now: DateTime<Utc>,
) -> PipelineReport {
    ensure_metrics_described();
    let t0 = Instant::now();

    let sources = cfg.enabled_sources();
    let classifier = Classifier::from_config(cfg);
    let trusted = TrustedDomains::new(cfg.trusted_image_domains.iter());

    let outcomes = futures::future::join_all(sources.iter().map(|s| {
        run_source(fetcher, s, limits, &classifier, &trusted, image_proxy_base, now)
    }))
    .await;

    let mut report = PipelineReport {
        started_at: Some(now),
        ..Default::default()
    };
    let mut all: Vec<Article> = Vec::new();
    for outcome in outcomes {
        match outcome {
            SourceOutcome::Ok {
                report: ok,
                mut articles,
                rejected,
            } => {
                tracing::debug!(
                    target: "ingest",
                    source = %ok.source_id,
                    parsed = ok.parsed,
                    accepted = ok.accepted,
                    "source ok"
                );
                report.rejected += rejected;
                report.succeeded.push(ok);
                all.append(&mut articles);
            }
            SourceOutcome::Failed(f) => {
                tracing::warn!(target: "ingest", source = %f.source_id, reason = %f.reason, "source failed");
                counter!("ingest_source_failures_total").increment(1);
                report.failed.push(f);
            }
        }
    }

    report.duplicates = dedup_by_title(&mut all);
    sort_articles(&mut all);
    all.truncate(limits.max_articles);

    report.article_count = all.len();
    report.articles = all;
    report.elapsed_ms = t0.elapsed().as_millis() as u64;

    counter!("ingest_runs_total").increment(1);
    counter!("ingest_articles_total").increment(report.article_count as u64);
    counter!("ingest_rejected_total").increment(report.rejected as u64);
    counter!("ingest_dedup_total").increment(report.duplicates as u64);
    histogram!("ingest_pipeline_ms").record(report.elapsed_ms as f64);
    gauge!("ingest_pipeline_last_run_ts").set(now.timestamp() as f64);

    tracing::info!(
        target: "ingest",
        articles = report.article_count,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        duplicates = report.duplicates,
        elapsed_ms = report.elapsed_ms,
        "pipeline run complete"
    );
    report
}
