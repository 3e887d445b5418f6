// Container health samples

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Docker container state; serializes to lowercase JSON (e.g. "running").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    #[serde(other)]
    Unknown,
}

impl ContainerState {
    /// Parse from Docker API state string (e.g. "running", "exited").
    pub fn from_docker(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource counters of one sample. Persisted as a versioned wincode blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCounters {
    pub nw_rx_bytes: u64,
    pub nw_tx_bytes: u64,
    pub nw_rx_packets: u64,
    pub nw_tx_packets: u64,
    pub nw_rx_errors: u64,
    pub nw_tx_errors: u64,
    pub nw_rx_dropped: u64,
    pub nw_tx_dropped: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub restarts: u64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub system_cpu_usage: u64,
    pub online_cpus: u32,
}

/// One sample of one container at one instant. Keyed by (container_name, timestamp, compacted).
///
/// A compacted record stands in for every raw sample of its container from
/// `timestamp` through `compacted_until`; raw samples leave it `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetric {
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub status: ContainerState,
    #[serde(default)]
    pub health_status: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_until: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: ContainerCounters,
}

impl HealthMetric {
    /// Store key: container name, millisecond timestamp and tier.
    /// Raw and compacted records never share a key.
    pub fn key(&self) -> (&str, i64, bool) {
        (
            self.container_name.as_str(),
            self.timestamp.timestamp_millis(),
            self.is_compacted(),
        )
    }

    pub fn is_compacted(&self) -> bool {
        self.compacted_until.is_some()
    }

    /// Last instant this record represents.
    pub fn covers_until(&self) -> DateTime<Utc> {
        self.compacted_until.unwrap_or(self.timestamp)
    }

    /// Whether `raw` is one of the samples this compacted record replaced.
    pub fn covers(&self, raw: &HealthMetric) -> bool {
        self.is_compacted()
            && self.container_name == raw.container_name
            && self.timestamp <= raw.timestamp
            && raw.timestamp <= self.covers_until()
    }

    /// Exited with no confirmed lifecycle; the only kind eligible for age-based pruning.
    pub fn is_exited_placeholder(&self) -> bool {
        self.status == ContainerState::Exited
            && self.started_at.is_none()
            && self.finished_at.is_none()
    }
}

/// One published port: host address and port as Docker reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Identity and configuration of one container, read live from the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetadata {
    /// First 12 characters of the container id.
    pub short_id: String,
    pub name: String,
    /// Image reference, or the short image id when none is recorded.
    pub image: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Container port ("80/tcp") to its host bindings; unpublished ports are omitted.
    #[serde(default)]
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}
