// Docker Engine adapter via bollard: container sampling and the event stream.

mod metadata;
mod stats;

use std::collections::BTreeMap;

use bollard::Docker;
use bollard::query_parameters::{
    EventsOptions, InspectContainerOptions, ListContainersOptions, StatsOptions,
};
use bollard::models::EventMessage;
use chrono::{DateTime, SubsecRound, Utc};
use futures_util::{Stream, StreamExt};
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::warn;

use crate::collector::StatsSource;
use crate::event_watcher::EventSource;
use crate::models::{ContainerMetadata, HealthMetric};

pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    /// Name -> state ("running", "exited", ...) for every container, stopped ones included.
    pub async fn live_status(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                ..Default::default()
            }))
            .await?;
        Ok(containers
            .iter()
            .filter_map(|c| {
                let name = container_name(c.names.as_ref())?;
                let state = c
                    .state
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Some((name, state))
            })
            .collect())
    }

    /// Identity and configuration of one container; `None` when it does not exist.
    pub async fn metadata(&self, name: &str) -> anyhow::Result<Option<ContainerMetadata>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(Some(metadata::from_inspect(&inspect))),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh sample of every container, without storing anything. Containers
    /// that fail to sample are logged and left out.
    pub async fn sample_all(&self) -> anyhow::Result<Vec<HealthMetric>> {
        let names = self.list_containers().await?;
        let mut out = Vec::with_capacity(names.len());
        for name in &names {
            match self.sample(name).await {
                Ok(m) => out.push(m),
                Err(e) => {
                    warn!(error = %e, container = %name, operation = "sample", "container sample failed")
                }
            }
        }
        Ok(out)
    }
}

impl StatsSource for DockerRepo {
    async fn list_containers(&self) -> anyhow::Result<Vec<String>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                ..Default::default()
            }))
            .await?;
        Ok(containers
            .iter()
            .filter_map(|c| container_name(c.names.as_ref()))
            .collect())
    }

    async fn sample(&self, name: &str) -> anyhow::Result<HealthMetric> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?;
        let options = StatsOptions {
            stream: false,
            ..Default::default()
        };
        let stats = self
            .docker
            .stats(name, Some(options))
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("no stats returned for container {}", name))??;
        // Millisecond precision matches the store key.
        let sampled_at = Utc::now().trunc_subsecs(3);
        Ok(stats::normalize(name, &inspect, &stats, sampled_at))
    }
}

impl EventSource for DockerRepo {
    /// The stream is pumped by its own task holding a cloned client; dropping the
    /// returned stream ends that task right away, even on a quiet daemon.
    fn subscribe(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, anyhow::Result<EventMessage>> {
        let docker = self.docker.clone();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let options = EventsOptions {
                since: since.map(|t| t.timestamp().to_string()),
                ..Default::default()
            };
            let events = docker
                .events(Some(options))
                .map(|item| item.map_err(anyhow::Error::from));
            pump(events, &tx).await;
        });
        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

/// Forward `stream` into `tx` until the stream ends or the receiver is dropped.
async fn pump<T>(stream: impl Stream<Item = T>, tx: &mpsc::Sender<T>) {
    let mut stream = std::pin::pin!(stream);
    loop {
        tokio::select! {
            item = stream.next() => {
                let Some(item) = item else { break };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }
}

fn container_name(names: Option<&Vec<String>>) -> Option<String> {
    names
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
}
