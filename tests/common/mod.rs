// Shared test helpers: sample builders and an in-memory store with fault injection.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use chronos::metric_repo::MetricStore;
use chronos::models::*;

pub fn metric(name: &str, timestamp: DateTime<Utc>, status: ContainerState) -> HealthMetric {
    HealthMetric {
        container_name: name.to_string(),
        timestamp,
        status,
        health_status: None,
        exit_code: None,
        started_at: None,
        finished_at: None,
        compacted_until: None,
        counters: ContainerCounters::default(),
    }
}

pub fn running(name: &str, timestamp: DateTime<Utc>) -> HealthMetric {
    let mut m = metric(name, timestamp, ContainerState::Running);
    m.started_at = Some(timestamp - chrono::Duration::hours(1));
    m.health_status = Some("healthy".to_string());
    m
}

pub fn event(kind: EventKind, action: &str, actor_name: &str, time: DateTime<Utc>) -> DockerEvent {
    let actor_id = format!("id-{}", actor_name);
    DockerEvent {
        id: format!(
            "{}#{}#{}#{}",
            kind,
            actor_id,
            action,
            time.timestamp_nanos_opt().unwrap_or_default()
        ),
        kind,
        action: action.to_string(),
        actor_id,
        actor_name: actor_name.to_string(),
        time,
    }
}

/// `MetricStore` over two maps, keyed like the SQLite tables.
#[derive(Default)]
pub struct MemoryStore {
    pub health: Mutex<BTreeMap<(String, i64, bool), HealthMetric>>,
    pub events: Mutex<BTreeMap<String, DockerEvent>>,
    pub fail_health_writes: AtomicBool,
    pub fail_event_writes: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Remove only the first N health rows of a delete call, then fail.
    pub partial_delete_limit: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn with_metrics(metrics: &[HealthMetric]) -> Self {
        let store = Self::default();
        {
            let mut health = store.health.lock().unwrap();
            for m in metrics {
                health.insert(owned_key(m), m.clone());
            }
        }
        store
    }

    pub fn health_rows(&self) -> Vec<HealthMetric> {
        self.health.lock().unwrap().values().cloned().collect()
    }

    pub fn raw_rows(&self) -> Vec<HealthMetric> {
        self.health_rows()
            .into_iter()
            .filter(|m| !m.is_compacted())
            .collect()
    }

    pub fn event_rows(&self) -> Vec<DockerEvent> {
        self.events.lock().unwrap().values().cloned().collect()
    }
}

fn owned_key(m: &HealthMetric) -> (String, i64, bool) {
    let (name, ts, compacted) = m.key();
    (name.to_string(), ts, compacted)
}

impl MetricStore for MemoryStore {
    async fn add_health_metric(&self, metric: &HealthMetric) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.fail_health_writes.load(Ordering::SeqCst),
            "injected write failure"
        );
        self.health
            .lock()
            .unwrap()
            .insert(owned_key(metric), metric.clone());
        Ok(())
    }

    async fn add_docker_event(&self, event: &DockerEvent) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.fail_event_writes.load(Ordering::SeqCst),
            "injected write failure"
        );
        self.events
            .lock()
            .unwrap()
            .entry(event.id.clone())
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn health_metrics_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HealthMetric>> {
        Ok(self
            .health
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.timestamp < cutoff)
            .cloned()
            .collect())
    }

    async fn docker_events_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DockerEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.time < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_health_metrics(&self, metrics: &[HealthMetric]) -> anyhow::Result<u64> {
        anyhow::ensure!(
            !self.fail_deletes.load(Ordering::SeqCst),
            "injected delete failure"
        );
        let mut health = self.health.lock().unwrap();
        if let Some(limit) = *self.partial_delete_limit.lock().unwrap() {
            for m in metrics.iter().take(limit) {
                health.remove(&owned_key(m));
            }
            anyhow::bail!("injected failure after {} deletes", limit);
        }
        Ok(metrics
            .iter()
            .filter(|m| health.remove(&owned_key(m)).is_some())
            .count() as u64)
    }

    async fn delete_docker_events(&self, events: &[DockerEvent]) -> anyhow::Result<u64> {
        anyhow::ensure!(
            !self.fail_deletes.load(Ordering::SeqCst),
            "injected delete failure"
        );
        let mut stored = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| stored.remove(&e.id).is_some())
            .count() as u64)
    }
}
