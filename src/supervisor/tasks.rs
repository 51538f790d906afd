use super::{TaskFn, TaskSpec};
use crate::aggregate::{
    build_camera_summaries, build_dashboard_overview, build_employee_stats, build_hourly_trend,
    build_live_list,
};
use crate::cache::CacheKeys;
use crate::config::BackgroundConfig;
use crate::context::AppContext;
use crate::correlation::{CorrelatedViolation, CorrelationWindow};
use crate::db::models::Label;
use crate::error::{bounded, Result};
use crate::hub::{Group, HubMessage};
use crate::utils::time::{day_floor, hour_floor, hours_ago, now_ts, SECONDS_PER_DAY};
use futures::future::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const VIOLATION_POLLING: &str = "violation_polling";
pub const STATS_REFRESH: &str = "stats_refresh";
pub const CACHE_CLEANUP: &str = "cache_cleanup";
pub const HEALTH_CHECK: &str = "health_check";

/// Registry entry: how often a task runs and how to build its body
pub struct TaskDefinition {
    pub name: &'static str,
    pub interval: fn(&BackgroundConfig) -> Duration,
    pub build: fn(Arc<AppContext>) -> TaskFn,
}

pub const BUILTIN_TASKS: &[TaskDefinition] = &[
    TaskDefinition {
        name: VIOLATION_POLLING,
        interval: poll_interval,
        build: violation_polling,
    },
    TaskDefinition {
        name: STATS_REFRESH,
        interval: stats_interval,
        build: stats_refresh,
    },
    TaskDefinition {
        name: CACHE_CLEANUP,
        interval: cleanup_interval,
        build: cache_cleanup,
    },
    TaskDefinition {
        name: HEALTH_CHECK,
        interval: health_interval,
        build: health_check,
    },
];

fn poll_interval(config: &BackgroundConfig) -> Duration {
    Duration::from_secs(config.violation_poll_interval)
}

fn stats_interval(config: &BackgroundConfig) -> Duration {
    Duration::from_secs(config.stats_refresh_interval)
}

fn cleanup_interval(config: &BackgroundConfig) -> Duration {
    Duration::from_secs(config.cache_cleanup_interval)
}

fn health_interval(config: &BackgroundConfig) -> Duration {
    Duration::from_secs(config.health_check_interval)
}

pub fn builtin_specs(ctx: &Arc<AppContext>) -> Vec<TaskSpec> {
    BUILTIN_TASKS
        .iter()
        .map(|def| TaskSpec {
            name: def.name.to_string(),
            interval: (def.interval)(&ctx.config.background),
            body: (def.build)(Arc::clone(ctx)),
        })
        .collect()
}

// cache writes in task bodies are best effort
async fn store_logged<T: Serialize + ?Sized>(
    ctx: &AppContext,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    if let Err(e) = ctx.cache.store(key, value, ttl).await {
        warn!("Failed to cache {}: {}", key, e);
    }
}

/// Correlates, refreshes the hot cache keys, then pushes what is new since
/// the previous tick to live subscribers.
pub(crate) struct ViolationPoller {
    ctx: Arc<AppContext>,
    /// Timestamp of the newest violation already pushed
    watermark: Mutex<f64>,
}

impl ViolationPoller {
    pub(crate) fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            watermark: Mutex::new(now_ts()),
        }
    }

    pub(crate) async fn tick(&self) -> Result<()> {
        let ctx = &self.ctx;
        let settings = &ctx.config.correlation;
        let ttl = &ctx.config.cache.ttl;
        let now = now_ts();

        let span = settings.trend_hours.max(settings.live_window_hours);
        let violations = ctx
            .engine
            .correlate(&CorrelationWindow::last_hours(now, span))
            .await?;

        let live_cutoff = hours_ago(now, settings.live_window_hours);
        let recent: Vec<CorrelatedViolation> = violations
            .iter()
            .take_while(|v| v.timestamp >= live_cutoff)
            .cloned()
            .collect();
        let live = build_live_list(&recent, settings.live_limit);
        let trend = build_hourly_trend(&violations, settings.trend_hours, now);

        // the cache must hold this tick's data before subscribers hear of it
        if let Err(e) = ctx
            .cache
            .invalidate_pattern(CacheKeys::live_violations_pattern())
            .await
        {
            warn!("Failed to invalidate live violations: {}", e);
        }
        let live_key =
            CacheKeys::live_violations(None, settings.live_window_hours, settings.live_limit);
        store_logged(ctx, &live_key, &live, ttl.live_violations()).await;
        let trend_key = CacheKeys::hourly_trend(settings.trend_hours);
        store_logged(ctx, &trend_key, &trend, ttl.hourly_trend()).await;

        let fresh = self.take_new(&violations);
        if !fresh.is_empty() {
            let count = fresh.len();
            let pushed = ctx
                .hub
                .push(Group::Violations, &HubMessage::new_violations(fresh, now));
            ctx.hub.push(
                Group::Dashboard,
                &HubMessage::ViolationSummary {
                    new_violations_count: count,
                    timestamp: now,
                },
            );
            info!(
                "Pushed {} new violations to {} subscribers ({} dropped, {} removed)",
                count, pushed.delivered, pushed.dropped, pushed.removed
            );
        }

        debug!("Violation poll: {} live, {} in trend window", live.len(), violations.len());
        Ok(())
    }

    // newest-first input; advances the watermark past what it returns
    fn take_new(&self, violations: &[CorrelatedViolation]) -> Vec<CorrelatedViolation> {
        let mut watermark = self.watermark.lock().unwrap_or_else(|e| e.into_inner());
        let fresh: Vec<CorrelatedViolation> = violations
            .iter()
            .take_while(|v| v.timestamp > *watermark)
            .cloned()
            .collect();
        if let Some(newest) = fresh.first() {
            *watermark = newest.timestamp;
        }
        fresh
    }
}

fn violation_polling(ctx: Arc<AppContext>) -> TaskFn {
    let poller = Arc::new(ViolationPoller::new(ctx));
    Arc::new(move || {
        let poller = Arc::clone(&poller);
        async move { poller.tick().await }.boxed()
    })
}

pub(crate) async fn refresh_stats(ctx: &AppContext) -> Result<()> {
    let now = now_ts();
    let ttl = &ctx.config.cache.ttl;
    let timeout = ctx.config.background.call_timeout();
    let day_ago = now - SECONDS_PER_DAY as f64;

    let (faces, people) = tokio::try_join!(
        bounded(
            timeout,
            "face detection query",
            ctx.store.query(None, &Label::Face, day_ago, now)
        ),
        bounded(
            timeout,
            "person detection query",
            ctx.store.query(None, &Label::Person, day_ago, now)
        ),
    )?;
    let mut sightings = faces;
    sightings.extend(people);

    let violations = ctx
        .engine
        .correlate(&CorrelationWindow::last_hours(now, 24))
        .await?;

    let employees = build_employee_stats(&sightings, &violations);
    store_logged(ctx, CacheKeys::employee_stats(), &employees, ttl.employee_stats()).await;

    let hour_start = hour_floor(now) as f64;
    let summaries =
        build_camera_summaries(&ctx.config.cameras, &sightings, &violations, hour_start);
    for summary in &summaries {
        let key = CacheKeys::camera_summary(&summary.camera);
        store_logged(ctx, &key, summary, ttl.camera_summary()).await;
    }
    store_logged(ctx, CacheKeys::all_camera_summaries(), &summaries, ttl.camera_summary()).await;

    let overview = build_dashboard_overview(
        &violations,
        &sightings,
        day_floor(now) as f64,
        hours_ago(now, 1),
        now,
    );
    store_logged(ctx, CacheKeys::dashboard_overview(), &overview, ttl.dashboard_overview()).await;

    info!(
        "Stats refreshed: {} employees, {} cameras, {} violations today",
        employees.len(),
        summaries.len(),
        overview.violations_today
    );
    Ok(())
}

fn stats_refresh(ctx: Arc<AppContext>) -> TaskFn {
    Arc::new(move || {
        let ctx = Arc::clone(&ctx);
        async move { refresh_stats(&ctx).await }.boxed()
    })
}

pub(crate) async fn clean_cache(ctx: &AppContext) -> Result<()> {
    let timeout = ctx.config.background.call_timeout();
    let backend = ctx.cache.backend();
    match bounded(timeout, "cache memory usage", backend.memory_usage()).await {
        Ok(Some(usage)) => info!("Cache memory usage: {}", usage),
        Ok(None) => {}
        Err(e) => warn!("Could not read cache memory usage: {}", e),
    }

    let distribution = ctx.cache.key_distribution().await?;
    debug!("Cache key distribution: {:?}", distribution);

    let purged = ctx.cache.purge_expired(&CacheKeys::managed_patterns()).await?;
    info!(
        "Cache cleanup purged {} entries across {} key groups",
        purged,
        distribution.len()
    );
    Ok(())
}

fn cache_cleanup(ctx: Arc<AppContext>) -> TaskFn {
    Arc::new(move || {
        let ctx = Arc::clone(&ctx);
        async move { clean_cache(&ctx).await }.boxed()
    })
}

pub(crate) async fn check_health(ctx: &AppContext) -> Result<()> {
    let report = ctx.probe_health().await;
    ctx.set_degraded(!report.database);

    if report.cache {
        ctx.cache
            .store(CacheKeys::system_health(), &report, ctx.config.cache.ttl.health())
            .await?;
    }
    if !report.is_healthy() {
        warn!(
            "Health check: database={} cache={}",
            report.database, report.cache
        );
    }
    Ok(())
}

fn health_check(ctx: Arc<AppContext>) -> TaskFn {
    Arc::new(move || {
        let ctx = Arc::clone(&ctx);
        async move { check_health(&ctx).await }.boxed()
    })
}
