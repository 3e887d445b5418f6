// Long-lived subscription to runtime lifecycle events.
// Every event is recorded; container events additionally request a metrics poll.
// A dropped stream is resubscribed with exponential backoff, resuming from the last recorded event.

use std::sync::Arc;
use std::time::Duration;

use bollard::models::EventMessage;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::collector::PollTrigger;
use crate::metric_repo::MetricStore;
use crate::models::{DockerEvent, EventKind};

pub trait EventSource: Send + Sync + 'static {
    /// Stream of events from `since` onwards (only new events when `None`).
    /// The stream ends or yields an error when the connection drops.
    fn subscribe(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, anyhow::Result<EventMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Doubling reconnect delay, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    cfg: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(cfg: BackoffConfig) -> Self {
        Self {
            current: cfg.initial,
            cfg,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cfg.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.cfg.initial;
    }
}

pub struct EventWatcher<E, S> {
    source: Arc<E>,
    store: Arc<S>,
    trigger: PollTrigger,
    backoff: BackoffConfig,
}

impl<E: EventSource, S: MetricStore> EventWatcher<E, S> {
    pub fn new(source: Arc<E>, store: Arc<S>, trigger: PollTrigger, backoff: BackoffConfig) -> Self {
        Self {
            source,
            store,
            trigger,
            backoff,
        }
    }

    /// Record one raw event. Malformed events are logged and dropped (`None`).
    /// A failed write still requests the poll for container events.
    pub async fn handle_event(&self, msg: &EventMessage) -> Option<DockerEvent> {
        let event = match DockerEvent::try_from(msg) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "dropping malformed docker event");
                return None;
            }
        };

        if event.kind == EventKind::Container {
            let outcome = self.trigger.request();
            debug!(
                container = %event.actor_name,
                action = %event.action,
                outcome = ?outcome,
                "container event, poll requested"
            );
        }

        if let Err(e) = self.store.add_docker_event(&event).await {
            warn!(
                error = %e,
                kind = %event.kind,
                action = %event.action,
                operation = "add_docker_event",
                "event write failed"
            );
        }
        Some(event)
    }

    /// Consume events until shutdown, reconnecting whenever the stream drops.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.backoff);
        // Resume point: start of the first subscription until an event is seen
        let mut since: Option<DateTime<Utc>> = Some(Utc::now());

        loop {
            let mut stream = self.source.subscribe(since);
            info!(since = ?since, "Subscribed to docker events");

            loop {
                tokio::select! {
                    item = stream.next() => match item {
                        Some(Ok(msg)) => {
                            backoff.reset();
                            if let Some(event) = self.handle_event(&msg).await {
                                since = Some(event.time);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "docker event stream failed");
                            break;
                        }
                        None => {
                            warn!("docker event stream ended");
                            break;
                        }
                    },
                    _ = shutdown_rx.changed() => {
                        info!("Event watcher shutting down");
                        return;
                    }
                }
            }

            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to docker events");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    info!("Event watcher shutting down");
                    return;
                }
            }
        }
    }
}
