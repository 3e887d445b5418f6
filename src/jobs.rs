// Bodies of the three scheduled jobs and their registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::collector::{Collector, StatsSource};
use crate::compaction::DataCompactManager;
use crate::config::SchedulerConfig;
use crate::metric_repo::{MetricStore, Table};
use crate::models::HealthMetric;
use crate::scheduler::{JobId, Scheduler, Trigger};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactSummary {
    pub read: usize,
    pub written: usize,
    pub deleted: u64,
}

impl fmt::Display for CompactSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={} written={} deleted={}",
            self.read, self.written, self.deleted
        )
    }
}

/// Replace raw health samples older than `window_days` by their compacted form.
///
/// Compacted records live in their own key tier, so writing them never touches
/// a raw sample. They are all written first; only then are the raw originals
/// deleted. If any write fails nothing is deleted.
///
/// A raw sample already covered by a stored compacted record is left over from
/// an interrupted run: it is deleted without being reduced again. Compacted
/// records are never fed back into the pipeline.
#[instrument(skip(store, pipeline), fields(operation = "compact"))]
pub async fn compact_health_metrics<S: MetricStore>(
    store: &S,
    pipeline: &DataCompactManager,
    window_days: u32,
) -> anyhow::Result<CompactSummary> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(window_days));
    let (done, raw): (Vec<HealthMetric>, Vec<HealthMetric>) = store
        .health_metrics_older_than(cutoff)
        .await?
        .into_iter()
        .partition(HealthMetric::is_compacted);
    if raw.is_empty() {
        return Ok(CompactSummary::default());
    }

    let coverage = Coverage::new(&done);
    let (leftovers, pending): (Vec<HealthMetric>, Vec<HealthMetric>) =
        raw.into_iter().partition(|m| coverage.covers(m));
    if !leftovers.is_empty() {
        warn!(
            count = leftovers.len(),
            "raw samples already compacted by an interrupted run"
        );
    }

    let compacted: Vec<HealthMetric> = pipeline
        .compact(&pending)
        .into_iter()
        .map(|mut m| {
            m.compacted_until = Some(m.covers_until());
            m
        })
        .collect();
    let mut write_failures = 0usize;
    for metric in &compacted {
        if let Err(e) = store.add_health_metric(metric).await {
            warn!(
                error = %e,
                container = %metric.container_name,
                table = Table::HealthMetrics.as_str(),
                operation = "add_health_metric",
                "compacted write failed"
            );
            write_failures += 1;
        }
    }
    anyhow::ensure!(
        write_failures == 0,
        "{} of {} compacted records failed to write; originals kept",
        write_failures,
        compacted.len()
    );

    let read = leftovers.len() + pending.len();
    let mut originals = leftovers;
    originals.extend(pending);
    let deleted = store.delete_health_metrics(&originals).await?;

    let summary = CompactSummary {
        read,
        written: compacted.len(),
        deleted,
    };
    info!(
        read = summary.read,
        written = summary.written,
        deleted = summary.deleted,
        "compaction complete"
    );
    Ok(summary)
}

/// Spans of stored compacted records per container, sorted by start.
struct Coverage<'a> {
    spans: HashMap<&'a str, Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl<'a> Coverage<'a> {
    fn new(compacted: &'a [HealthMetric]) -> Self {
        let mut spans: HashMap<&str, Vec<_>> = HashMap::new();
        for c in compacted {
            spans
                .entry(c.container_name.as_str())
                .or_default()
                .push((c.timestamp, c.covers_until()));
        }
        for v in spans.values_mut() {
            v.sort_unstable();
        }
        Self { spans }
    }

    fn covers(&self, raw: &HealthMetric) -> bool {
        let Some(spans) = self.spans.get(raw.container_name.as_str()) else {
            return false;
        };
        let idx = spans.partition_point(|(start, _)| *start <= raw.timestamp);
        idx > 0 && raw.timestamp <= spans[idx - 1].1
    }
}

/// Delete docker events older than `retention_days`. Returns rows removed.
#[instrument(skip(store), fields(operation = "cleanup"))]
pub async fn cleanup_docker_events<S: MetricStore>(
    store: &S,
    retention_days: u32,
) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let expired = store.docker_events_older_than(cutoff).await?;
    if expired.is_empty() {
        return Ok(0);
    }
    let deleted = store.delete_docker_events(&expired).await?;
    info!(
        expired = expired.len(),
        deleted,
        table = Table::DockerEvents.as_str(),
        "event cleanup complete"
    );
    Ok(deleted)
}

fn trigger_for(schedule: Option<&str>, interval_secs: u64) -> anyhow::Result<Trigger> {
    match schedule {
        Some(expr) => Trigger::cron(expr),
        None => Ok(Trigger::Every(Duration::from_secs(interval_secs))),
    }
}

/// Register poll, compact and cleanup on `scheduler` with triggers from `config`.
pub fn register_jobs<R: StatsSource, S: MetricStore>(
    scheduler: &mut Scheduler,
    config: &SchedulerConfig,
    collector: Arc<Collector<R, S>>,
    store: Arc<S>,
    pipeline: Arc<DataCompactManager>,
) -> anyhow::Result<()> {
    scheduler.register(
        JobId::Poll,
        Trigger::Every(Duration::from_secs(config.poll_interval_secs)),
        move || {
            let collector = collector.clone();
            async move {
                let summary = collector.poll().await;
                Ok::<_, anyhow::Error>(summary.to_string())
            }
        },
    );

    let window_days = config.compact_window_days;
    let compact_store = store.clone();
    scheduler.register(
        JobId::Compact,
        trigger_for(
            config.compact_schedule.as_deref(),
            config.compact_interval_secs,
        )?,
        move || {
            let store = compact_store.clone();
            let pipeline = pipeline.clone();
            async move {
                compact_health_metrics(store.as_ref(), &pipeline, window_days)
                    .await
                    .map(|s| s.to_string())
            }
        },
    );

    let retention_days = config.event_retention_days;
    scheduler.register(
        JobId::Cleanup,
        trigger_for(
            config.cleanup_schedule.as_deref(),
            config.cleanup_interval_secs,
        )?,
        move || {
            let store = store.clone();
            async move {
                cleanup_docker_events(store.as_ref(), retention_days)
                    .await
                    .map(|n| format!("deleted={}", n))
            }
        },
    );
    Ok(())
}
