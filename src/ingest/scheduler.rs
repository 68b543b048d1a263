// src/ingest/scheduler.rs
//! Refresh scheduling: due-check, lock, pipeline, persist, unlock.
//!
//! Three triggers share one core (`refresh`): the periodic ticker (checks
//! due-ness first), the lazy read-path trigger (cache empty, runs in the
//! background) and the admin force-refresh (clears the lock, no due-check).

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::clock::SharedClock;
use crate::config::CachedConfig;
use crate::ingest::fetcher::FeedFetcher;
use crate::ingest::{run_once, PipelineLimits};
use crate::lock::RefreshLock;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Lazy,
    Forced,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::Lazy => "lazy",
            Trigger::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New snapshot written.
    Refreshed { articles: usize, failed_sources: usize },
    /// Pipeline produced nothing; the previous snapshot was kept.
    Empty { failed_sources: usize },
    NotDue,
    LockBusy,
    /// The KV store could not be reached for the lock or the due-check.
    StoreUnavailable(String),
    Failed(String),
}

impl RefreshOutcome {
    fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Refreshed { .. } => "refreshed",
            RefreshOutcome::Empty { .. } => "empty",
            RefreshOutcome::NotDue => "not_due",
            RefreshOutcome::LockBusy => "lock_busy",
            RefreshOutcome::StoreUnavailable(_) => "store_unavailable",
            RefreshOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerCfg {
    pub refresh_interval: Duration,
    pub cron_interval: Duration,
    pub limits: PipelineLimits,
    pub image_proxy_base: String,
}

struct Inner {
    cache: CacheStore,
    lock: Arc<dyn RefreshLock>,
    config: CachedConfig,
    fetcher: Arc<dyn FeedFetcher>,
    clock: SharedClock,
    cfg: SchedulerCfg,
    lazy_in_flight: AtomicBool,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        cache: CacheStore,
        lock: Arc<dyn RefreshLock>,
        config: CachedConfig,
        fetcher: Arc<dyn FeedFetcher>,
        clock: SharedClock,
        cfg: SchedulerCfg,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                lock,
                config,
                fetcher,
                clock,
                cfg,
                lazy_in_flight: AtomicBool::new(false),
            }),
        }
    }

    pub fn cfg(&self) -> &SchedulerCfg {
        &self.inner.cfg
    }

    pub fn lock(&self) -> &Arc<dyn RefreshLock> {
        &self.inner.lock
    }

    /// Due when there is no recorded run or the interval has elapsed.
    pub async fn is_due(&self) -> Result<bool, StoreError> {
        let last = self.inner.cache.last_scheduled_run().await?;
        Ok(is_due_at(last, self.inner.clock.now(), self.inner.cfg.refresh_interval))
    }

    /// Periodic entry point. Records the tick, then refreshes when due.
    pub async fn run_if_due(&self) -> RefreshOutcome {
        let now = self.inner.clock.now();
        if let Err(e) = self.inner.cache.set_last_cron_run(now).await {
            tracing::warn!(target: "scheduler", error = %e, "could not record cron run");
        }
        match self.is_due().await {
            Ok(true) => self.refresh(Trigger::Periodic).await,
            Ok(false) => {
                tracing::debug!(target: "scheduler", "refresh not due");
                RefreshOutcome::NotDue
            }
            Err(e) => {
                tracing::error!(target: "scheduler", error = %e, "due-check failed");
                RefreshOutcome::StoreUnavailable(e.to_string())
            }
        }
    }

    /// Clears any held lock and refreshes now, regardless of due-ness.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        if let Err(e) = self.inner.lock.force_clear().await {
            tracing::error!(target: "scheduler", error = %e, "lock clear failed");
            return self.record(RefreshOutcome::StoreUnavailable(e.to_string()));
        }
        self.refresh(Trigger::Forced).await
    }

    /// Fire-and-forget refresh for an empty cache. Returns false when one
    /// started by this process is still running.
    pub fn trigger_lazy(&self) -> bool {
        if self.inner.lazy_in_flight.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.refresh(Trigger::Lazy).await;
            tracing::debug!(target: "scheduler", outcome = outcome.label(), "lazy refresh finished");
            this.inner.lazy_in_flight.store(false, Ordering::Release);
        });
        true
    }

    /// Ticks every `cron_interval`, starting immediately.
    pub fn spawn_periodic(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.cfg.cron_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = this.run_if_due().await;
                tracing::info!(target: "scheduler", outcome = outcome.label(), "scheduler tick");
            }
        })
    }

    /// Lock, run the pipeline, persist, and always unlock.
    ///
    /// The run lives on its own task, so dropping the returned future (a
    /// disconnected admin request, say) neither aborts it nor strands the lock.
    pub async fn refresh(&self, trigger: Trigger) -> RefreshOutcome {
        let this = self.clone();
        match tokio::spawn(async move { this.refresh_task(trigger).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(target: "scheduler", trigger = trigger.as_str(), error = %e, "refresh task died");
                self.record(RefreshOutcome::Failed(format!("refresh task died: {e}")))
            }
        }
    }

    async fn refresh_task(&self, trigger: Trigger) -> RefreshOutcome {
        let held = match self.inner.lock.try_acquire().await {
            Ok(Some(token)) => HeldLock::new(self.inner.lock.clone(), token),
            Ok(None) => {
                tracing::info!(target: "scheduler", trigger = trigger.as_str(), "refresh already running elsewhere");
                return self.record(RefreshOutcome::LockBusy);
            }
            Err(e) => {
                tracing::error!(target: "scheduler", error = %e, "lock acquire failed");
                return self.record(RefreshOutcome::StoreUnavailable(e.to_string()));
            }
        };

        let t0 = Instant::now();
        let started = self.inner.clock.now();
        let result = self.run_locked(started).await;
        held.release().await;

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        let outcome = match result {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(
                    target: "scheduler",
                    trigger = trigger.as_str(),
                    elapsed_ms,
                    error = %format!("{e:#}"),
                    "refresh failed; keeping previous snapshot"
                );
                RefreshOutcome::Failed(format!("{e:#}"))
            }
        };
        tracing::info!(
            target: "scheduler",
            trigger = trigger.as_str(),
            outcome = outcome.label(),
            elapsed_ms,
            "refresh finished"
        );
        self.record(outcome)
    }

    async fn run_locked(&self, started: DateTime<Utc>) -> anyhow::Result<RefreshOutcome> {
        let cfg = self.inner.config.get().await?;
        let report = run_once(
            self.inner.fetcher.as_ref(),
            &cfg,
            &self.inner.cfg.limits,
            &self.inner.cfg.image_proxy_base,
            started,
        )
        .await;

        self.inner.cache.set_last_report(&report).await?;
        let failed_sources = report.failed.len();
        if report.is_empty() {
            tracing::warn!(target: "scheduler", failed_sources, "pipeline returned no articles");
            return Ok(RefreshOutcome::Empty { failed_sources });
        }

        let meta = self.inner.cache.put_snapshot(report.articles).await?;
        self.inner.cache.set_last_scheduled_run(started).await?;
        gauge!("scheduler_last_refresh_ts").set(started.timestamp() as f64);
        Ok(RefreshOutcome::Refreshed {
            articles: meta.count,
            failed_sources,
        })
    }

    fn record(&self, outcome: RefreshOutcome) -> RefreshOutcome {
        counter!("scheduler_refresh_total", "outcome" => outcome.label()).increment(1);
        outcome
    }
}

/// A held refresh lock. Released explicitly on the normal path; if the
/// holder unwinds first, `Drop` hands the release to the runtime.
struct HeldLock {
    lock: Arc<dyn RefreshLock>,
    token: Option<String>,
}

impl HeldLock {
    fn new(lock: Arc<dyn RefreshLock>, token: String) -> Self {
        Self {
            lock,
            token: Some(token),
        }
    }

    async fn release(mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.lock.release(&token).await {
                tracing::warn!(target: "scheduler", error = %e, "lock release failed; TTL will reclaim it");
            }
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let lock = self.lock.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = lock.release(&token).await {
                        tracing::warn!(target: "scheduler", error = %e, "deferred lock release failed; TTL will reclaim it");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(target: "scheduler", "no runtime to release the lock; TTL will reclaim it");
            }
        }
    }
}

pub fn is_due_at(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        None => true,
        Some(at) => chrono::Duration::from_std(interval)
            .map(|i| now - at >= i)
            .unwrap_or(false),
    }
}
