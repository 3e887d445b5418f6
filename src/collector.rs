// Metric collector: sample every container and write each sample individually.
// Event-triggered polls go through a capacity-1 channel drained by a dedicated worker task,
// so requests made while one is already pending are coalesced.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::metric_repo::MetricStore;
use crate::models::HealthMetric;

/// Live resource counters of the runtime's containers.
pub trait StatsSource: Send + Sync + 'static {
    /// Names of every tracked container, stopped ones included.
    fn list_containers(&self) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send;

    fn sample(&self, name: &str) -> impl Future<Output = anyhow::Result<HealthMetric>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub sampled: usize,
    pub written: usize,
    pub failed: usize,
}

impl fmt::Display for PollSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sampled={} written={} failed={}",
            self.sampled, self.written, self.failed
        )
    }
}

pub struct Collector<R, S> {
    source: Arc<R>,
    store: Arc<S>,
}

impl<R: StatsSource, S: MetricStore> Collector<R, S> {
    pub fn new(source: Arc<R>, store: Arc<S>) -> Self {
        Self { source, store }
    }

    /// One pass over all containers. A failing container is logged and skipped.
    #[instrument(skip(self), fields(operation = "poll"))]
    pub async fn poll(&self) -> PollSummary {
        let names = match self.source.list_containers().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, operation = "list_containers", "container listing failed");
                return PollSummary::default();
            }
        };

        let mut summary = PollSummary {
            sampled: names.len(),
            ..Default::default()
        };
        for name in &names {
            let metric = match self.source.sample(name).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, container = %name, operation = "sample", "container sample failed");
                    summary.failed += 1;
                    continue;
                }
            };
            if let Err(e) = self.store.add_health_metric(&metric).await {
                warn!(error = %e, container = %name, operation = "add_health_metric", "metric write failed");
                summary.failed += 1;
                continue;
            }
            summary.written += 1;
        }
        debug!(
            sampled = summary.sampled,
            written = summary.written,
            failed = summary.failed,
            "poll complete"
        );
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOutcome {
    /// A poll is now pending.
    Queued,
    /// A poll was already pending; this request merged into it.
    Coalesced,
    /// The poll worker has stopped.
    Closed,
}

/// Non-blocking handle for requesting an out-of-schedule poll.
#[derive(Clone)]
pub struct PollTrigger {
    tx: mpsc::Sender<()>,
}

impl PollTrigger {
    /// Trigger handle plus the receiver to hand to [`spawn_poll_worker`].
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn request(&self) -> TriggerOutcome {
        match self.tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(())) => TriggerOutcome::Coalesced,
            Err(mpsc::error::TrySendError::Closed(())) => TriggerOutcome::Closed,
        }
    }
}

/// Runs one poll per pending request until the trigger handles are dropped or shutdown.
pub fn spawn_poll_worker<R: StatsSource, S: MetricStore>(
    collector: Arc<Collector<R, S>>,
    mut rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(()) => {
                            let summary = collector.poll().await;
                            info!(
                                sampled = summary.sampled,
                                written = summary.written,
                                failed = summary.failed,
                                "triggered poll"
                            );
                        }
                        None => break,
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!("Poll worker shutting down");
    })
}
