// Metric store: health_metrics and docker_events tables in SQLite.
// Both tables are range-queried and bulk-deleted by their timestamp column (ms since epoch).

mod blob;

use std::future::Future;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{instrument, warn};

use crate::models::{ContainerCounters, ContainerState, DockerEvent, EventKind, HealthMetric};

/// Rows per delete transaction.
const DELETE_CHUNK: usize = 500;

/// Tables owned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    HealthMetrics,
    DockerEvents,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::HealthMetrics => "health_metrics",
            Table::DockerEvents => "docker_events",
        }
    }
}

/// Append / range / delete contract the collector, watcher and jobs depend on.
///
/// Every operation is independent: there is no transaction spanning calls, and a
/// bulk delete may remove only part of its input. Callers order writes so that a
/// failure between two calls never loses data.
pub trait MetricStore: Send + Sync + 'static {
    /// Persist one health sample; an existing row with the same key is replaced.
    /// Raw and compacted records are keyed apart, so a compacted write never
    /// replaces a raw sample.
    fn add_health_metric(
        &self,
        metric: &HealthMetric,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Persist one lifecycle event; a row with the same id is left untouched.
    fn add_docker_event(
        &self,
        event: &DockerEvent,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Rows that cannot be decoded are skipped, never returned with defaults.
    fn health_metrics_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Vec<HealthMetric>>> + Send;

    fn docker_events_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Vec<DockerEvent>>> + Send;

    /// Best-effort delete by key. Returns rows removed.
    fn delete_health_metrics(
        &self,
        metrics: &[HealthMetric],
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Best-effort delete by id. Returns rows removed.
    fn delete_docker_events(
        &self,
        events: &[DockerEvent],
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

pub struct SqliteMetricRepo {
    pool: SqlitePool,
}

impl SqliteMetricRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS health_metrics (
                container_name TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL,
                health_status TEXT,
                exit_code INTEGER,
                started_at INTEGER,
                finished_at INTEGER,
                compacted INTEGER NOT NULL DEFAULT 0,
                compacted_until INTEGER,
                counters BLOB NOT NULL,
                PRIMARY KEY (container_name, timestamp, compacted)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_health_metrics_timestamp ON health_metrics(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS docker_events (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                action TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_name TEXT NOT NULL,
                time INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_docker_events_time ON docker_events(time)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Health samples at or after `since`, optionally for one container. Ascending by timestamp.
    #[instrument(skip(self), fields(repo = "metrics", operation = "recent_health_metrics"))]
    pub async fn recent_health_metrics(
        &self,
        since: DateTime<Utc>,
        container: Option<&str>,
    ) -> anyhow::Result<Vec<HealthMetric>> {
        let rows = match container {
            Some(name) => {
                sqlx::query(
                    "SELECT * FROM health_metrics WHERE container_name = $1 AND timestamp >= $2
                     ORDER BY timestamp ASC",
                )
                .bind(name)
                .bind(since.timestamp_millis())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM health_metrics WHERE timestamp >= $1 ORDER BY timestamp ASC",
                )
                .bind(since.timestamp_millis())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(decode_health_rows(&rows))
    }

    /// Every stored sample of one container. Ascending by timestamp.
    pub async fn health_metrics_for_container(
        &self,
        container: &str,
    ) -> anyhow::Result<Vec<HealthMetric>> {
        let rows = sqlx::query(
            "SELECT * FROM health_metrics WHERE container_name = $1 ORDER BY timestamp ASC",
        )
        .bind(container)
        .fetch_all(&self.pool)
        .await?;
        Ok(decode_health_rows(&rows))
    }

    /// Events at or after `since`. Ascending by time.
    #[instrument(skip(self), fields(repo = "metrics", operation = "docker_events_since"))]
    pub async fn docker_events_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DockerEvent>> {
        let rows = sqlx::query("SELECT * FROM docker_events WHERE time >= $1 ORDER BY time ASC")
            .bind(since.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_event_row).collect()
    }

    pub async fn count(&self, table: Table) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table.as_str()))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

impl MetricStore for SqliteMetricRepo {
    async fn add_health_metric(&self, metric: &HealthMetric) -> anyhow::Result<()> {
        let counters = blob::with_version_prefix(
            blob::COUNTERS_BLOB_VERSION,
            wincode::serialize(&metric.counters).map_err(|e| anyhow::anyhow!("wincode: {}", e))?,
        );
        sqlx::query(
            "INSERT OR REPLACE INTO health_metrics
             (container_name, timestamp, status, health_status, exit_code, started_at, finished_at,
              compacted, compacted_until, counters)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&metric.container_name)
        .bind(metric.timestamp.timestamp_millis())
        .bind(metric.status.as_str())
        .bind(metric.health_status.as_deref())
        .bind(metric.exit_code)
        .bind(metric.started_at.map(|t| t.timestamp_millis()))
        .bind(metric.finished_at.map(|t| t.timestamp_millis()))
        .bind(metric.is_compacted())
        .bind(metric.compacted_until.map(|t| t.timestamp_millis()))
        .bind(&counters)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_docker_event(&self, event: &DockerEvent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO docker_events (id, kind, action, actor_id, actor_name, time)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&event.id)
        .bind(event.kind.as_str())
        .bind(&event.action)
        .bind(&event.actor_id)
        .bind(&event.actor_name)
        .bind(event.time.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "metrics", operation = "health_metrics_older_than"))]
    async fn health_metrics_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthMetric>> {
        let rows = sqlx::query("SELECT * FROM health_metrics WHERE timestamp < $1 ORDER BY timestamp ASC")
            .bind(cutoff.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_health_rows(&rows))
    }

    #[instrument(skip(self), fields(repo = "metrics", operation = "docker_events_older_than"))]
    async fn docker_events_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DockerEvent>> {
        let rows = sqlx::query("SELECT * FROM docker_events WHERE time < $1 ORDER BY time ASC")
            .bind(cutoff.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_event_row).collect()
    }

    #[instrument(
        skip(self, metrics),
        fields(repo = "metrics", operation = "delete_health_metrics", count = metrics.len())
    )]
    async fn delete_health_metrics(&self, metrics: &[HealthMetric]) -> anyhow::Result<u64> {
        let mut deleted = 0u64;
        let mut failed_chunks = 0usize;
        for chunk in metrics.chunks(DELETE_CHUNK) {
            let result: anyhow::Result<u64> = async {
                let mut tx = self.pool.begin().await?;
                let mut n = 0u64;
                for m in chunk {
                    let (name, ts, compacted) = m.key();
                    n += sqlx::query(
                        "DELETE FROM health_metrics
                         WHERE container_name = $1 AND timestamp = $2 AND compacted = $3",
                    )
                    .bind(name)
                    .bind(ts)
                    .bind(compacted)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }
                tx.commit().await?;
                Ok(n)
            }
            .await;
            match result {
                Ok(n) => deleted += n,
                Err(e) => {
                    warn!(error = %e, table = Table::HealthMetrics.as_str(), "delete chunk failed");
                    failed_chunks += 1;
                }
            }
        }
        anyhow::ensure!(
            failed_chunks == 0,
            "{} of {} delete chunks failed ({} rows deleted)",
            failed_chunks,
            metrics.len().div_ceil(DELETE_CHUNK),
            deleted
        );
        Ok(deleted)
    }

    #[instrument(
        skip(self, events),
        fields(repo = "metrics", operation = "delete_docker_events", count = events.len())
    )]
    async fn delete_docker_events(&self, events: &[DockerEvent]) -> anyhow::Result<u64> {
        let mut deleted = 0u64;
        let mut failed_chunks = 0usize;
        for chunk in events.chunks(DELETE_CHUNK) {
            let result: anyhow::Result<u64> = async {
                let mut tx = self.pool.begin().await?;
                let mut n = 0u64;
                for e in chunk {
                    n += sqlx::query("DELETE FROM docker_events WHERE id = $1")
                        .bind(&e.id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;
                Ok(n)
            }
            .await;
            match result {
                Ok(n) => deleted += n,
                Err(e) => {
                    warn!(error = %e, table = Table::DockerEvents.as_str(), "delete chunk failed");
                    failed_chunks += 1;
                }
            }
        }
        anyhow::ensure!(
            failed_chunks == 0,
            "{} of {} delete chunks failed ({} rows deleted)",
            failed_chunks,
            events.len().div_ceil(DELETE_CHUNK),
            deleted
        );
        Ok(deleted)
    }
}

fn millis_to_utc(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("timestamp out of range: {}", ms))
}

/// Decode health rows, dropping any that fail with a warning.
fn decode_health_rows(rows: &[SqliteRow]) -> Vec<HealthMetric> {
    rows.iter()
        .filter_map(|row| match parse_health_row(row) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(
                    error = %e,
                    table = Table::HealthMetrics.as_str(),
                    "undecodable health row skipped"
                );
                None
            }
        })
        .collect()
}

fn parse_health_row(row: &SqliteRow) -> anyhow::Result<HealthMetric> {
    let container_name: String = row.try_get("container_name")?;
    let timestamp: i64 = row.try_get("timestamp")?;
    let status: String = row.try_get("status")?;
    let health_status: Option<String> = row.try_get("health_status")?;
    let exit_code: Option<i64> = row.try_get("exit_code")?;
    let started_at: Option<i64> = row.try_get("started_at")?;
    let finished_at: Option<i64> = row.try_get("finished_at")?;
    let compacted_until: Option<i64> = row.try_get("compacted_until")?;
    let counters: Vec<u8> = row.try_get("counters")?;

    let payload = blob::blob_payload(&counters, blob::COUNTERS_BLOB_VERSION).ok_or_else(|| {
        anyhow::anyhow!(
            "counters blob of {}@{} has an unknown version",
            container_name,
            timestamp
        )
    })?;
    let counters = wincode::deserialize::<ContainerCounters>(payload)
        .map_err(|e| anyhow::anyhow!("wincode counters of {}@{}: {}", container_name, timestamp, e))?;

    Ok(HealthMetric {
        timestamp: millis_to_utc(timestamp)?,
        status: ContainerState::from_docker(&status),
        health_status,
        exit_code,
        started_at: started_at.map(millis_to_utc).transpose()?,
        finished_at: finished_at.map(millis_to_utc).transpose()?,
        compacted_until: compacted_until.map(millis_to_utc).transpose()?,
        counters,
        container_name,
    })
}

fn parse_event_row(row: &SqliteRow) -> anyhow::Result<DockerEvent> {
    let kind: String = row.try_get("kind")?;
    let time: i64 = row.try_get("time")?;
    Ok(DockerEvent {
        id: row.try_get("id")?,
        kind: EventKind::parse(&kind),
        action: row.try_get("action")?,
        actor_id: row.try_get("actor_id")?,
        actor_name: row.try_get("actor_name")?,
        time: millis_to_utc(time)?,
    })
}
