// SqliteMetricRepo tests: init, upsert, range reads, dedupe, bulk delete

mod common;

use chrono::{Duration, SubsecRound, Utc};
use chronos::compaction::DataCompactManager;
use chronos::jobs::compact_health_metrics;
use chronos::metric_repo::{MetricStore, SqliteMetricRepo, Table};
use chronos::models::*;
use common::{event, metric, running};
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> String {
    dir.path().join("metrics.db").to_str().unwrap().to_string()
}

async fn open_repo(dir: &TempDir) -> SqliteMetricRepo {
    let repo = SqliteMetricRepo::connect(&db_path(dir), 2)
        .await
        .unwrap();
    repo.init().await.unwrap();
    repo
}

#[tokio::test]
async fn metric_repo_connect_and_init_twice() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;
    // Second init is no-op (IF NOT EXISTS)
    repo.init().await.unwrap();
    assert_eq!(repo.count(Table::HealthMetrics).await.unwrap(), 0);
    assert_eq!(repo.count(Table::DockerEvents).await.unwrap(), 0);
}

#[tokio::test]
async fn metric_repo_round_trips_health_metric() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let now = Utc::now().trunc_subsecs(3);
    let mut m = running("web", now);
    m.exit_code = Some(0);
    m.started_at = m.started_at.map(|t| t.trunc_subsecs(3));
    m.counters = ContainerCounters {
        nw_rx_bytes: 1_000,
        disk_write_bytes: 42,
        memory_usage_bytes: 256 * 1024 * 1024,
        memory_percent: 12.5,
        cpu_percent: 3.25,
        online_cpus: 8,
        ..Default::default()
    };
    repo.add_health_metric(&m).await.unwrap();

    let rows = repo
        .recent_health_metrics(now - Duration::minutes(1), Some("web"))
        .await
        .unwrap();
    assert_eq!(rows, vec![m]);
}

#[tokio::test]
async fn metric_repo_same_key_replaces_row() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let ts = Utc::now().trunc_subsecs(3);
    let first = metric("db", ts, ContainerState::Running);
    let mut second = metric("db", ts, ContainerState::Exited);
    second.counters.restarts = 3;
    repo.add_health_metric(&first).await.unwrap();
    repo.add_health_metric(&second).await.unwrap();

    assert_eq!(repo.count(Table::HealthMetrics).await.unwrap(), 1);
    let rows = repo.health_metrics_for_container("db").await.unwrap();
    assert_eq!(rows[0].status, ContainerState::Exited);
    assert_eq!(rows[0].counters.restarts, 3);
}

#[tokio::test]
async fn metric_repo_compacted_row_never_replaces_raw_sample() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let ts = Utc::now().trunc_subsecs(3) - Duration::days(20);
    let mut raw = running("web", ts);
    raw.started_at = raw.started_at.map(|t| t.trunc_subsecs(3));
    raw.counters.nw_rx_bytes = 10;
    let mut compacted = raw.clone();
    compacted.compacted_until = Some(ts + Duration::minutes(90));
    compacted.counters.nw_rx_bytes = 100;

    repo.add_health_metric(&raw).await.unwrap();
    repo.add_health_metric(&compacted).await.unwrap();
    assert_eq!(repo.count(Table::HealthMetrics).await.unwrap(), 2);

    assert_eq!(repo.delete_health_metrics(&[raw]).await.unwrap(), 1);
    let rows = repo.health_metrics_for_container("web").await.unwrap();
    assert_eq!(rows, vec![compacted]);
}

#[tokio::test]
async fn metric_repo_skips_undecodable_counters() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let ts = Utc::now().trunc_subsecs(3) - Duration::days(20);
    let mut m = running("web", ts);
    m.counters.nw_rx_bytes = 12_345;
    repo.add_health_metric(&m).await.unwrap();
    repo.add_health_metric(&running("db", ts)).await.unwrap();

    let raw = sqlx::SqlitePool::connect(&format!("sqlite:{}", db_path(&dir)))
        .await
        .unwrap();
    sqlx::query("UPDATE health_metrics SET counters = x'02ff' WHERE container_name = 'web'")
        .execute(&raw)
        .await
        .unwrap();

    let old = repo
        .health_metrics_older_than(Utc::now() - Duration::days(14))
        .await
        .unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].container_name, "db");

    // Compaction never rewrites the bad row with defaulted counters
    let summary = compact_health_metrics(&repo, &DataCompactManager::standard(14), 14)
        .await
        .unwrap();
    assert_eq!(summary.read, 1);
    let blob: Vec<u8> =
        sqlx::query_scalar("SELECT counters FROM health_metrics WHERE container_name = 'web'")
            .fetch_one(&raw)
            .await
            .unwrap();
    assert_eq!(blob, vec![0x02, 0xff]);
    assert_eq!(repo.count(Table::HealthMetrics).await.unwrap(), 2);
}

#[tokio::test]
async fn metric_repo_older_than_is_strict_and_ascending() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let cutoff = Utc::now().trunc_subsecs(3) - Duration::days(14);
    for m in [
        metric("a", cutoff - Duration::days(2), ContainerState::Running),
        metric("b", cutoff - Duration::days(5), ContainerState::Running),
        metric("a", cutoff, ContainerState::Running),
        metric("a", cutoff + Duration::days(1), ContainerState::Running),
    ] {
        repo.add_health_metric(&m).await.unwrap();
    }

    let old = repo.health_metrics_older_than(cutoff).await.unwrap();
    assert_eq!(old.len(), 2);
    assert_eq!(old[0].container_name, "b");
    assert_eq!(old[1].container_name, "a");
}

#[tokio::test]
async fn metric_repo_delete_health_metrics_by_key() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let now = Utc::now().trunc_subsecs(3);
    let rows: Vec<HealthMetric> = (0..1_200)
        .map(|i| metric("busy", now - Duration::seconds(i), ContainerState::Running))
        .collect();
    for m in &rows {
        repo.add_health_metric(m).await.unwrap();
    }

    // Spans several delete chunks; a missing key deletes nothing.
    let mut doomed = rows[..1_100].to_vec();
    doomed.push(metric("ghost", now, ContainerState::Running));
    let deleted = repo.delete_health_metrics(&doomed).await.unwrap();
    assert_eq!(deleted, 1_100);
    assert_eq!(repo.count(Table::HealthMetrics).await.unwrap(), 100);
}

#[tokio::test]
async fn metric_repo_events_dedupe_and_filter_by_time() {
    let dir = TempDir::new().unwrap();
    let repo = open_repo(&dir).await;

    let now = Utc::now().trunc_subsecs(3);
    let old = event(EventKind::Container, "die", "web", now - Duration::days(20));
    let fresh = event(EventKind::Network, "connect", "bridge", now);
    repo.add_docker_event(&old).await.unwrap();
    repo.add_docker_event(&fresh).await.unwrap();
    // Replay after reconnect
    repo.add_docker_event(&fresh).await.unwrap();
    assert_eq!(repo.count(Table::DockerEvents).await.unwrap(), 2);

    let expired = repo
        .docker_events_older_than(now - Duration::days(14))
        .await
        .unwrap();
    assert_eq!(expired, vec![old.clone()]);

    let recent = repo
        .docker_events_since(now - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(recent, vec![fresh]);

    assert_eq!(repo.delete_docker_events(&expired).await.unwrap(), 1);
    assert_eq!(repo.count(Table::DockerEvents).await.unwrap(), 1);
}
