// Per-container downsampling: every run of REDUCTION_FACTOR consecutive samples
// (chronological, grouped by container name) collapses into one record.
// Cumulative counters are summed, gauges averaged. A trailing short run forms its own record.

use std::collections::BTreeMap;

use super::CompactionStrategy;
use crate::models::{ContainerCounters, ContainerState, HealthMetric};

pub const REDUCTION_FACTOR: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceByTenForEachContainer;

impl CompactionStrategy for ReduceByTenForEachContainer {
    fn name(&self) -> String {
        "ReduceByTenForEachContainer".to_string()
    }

    /// Output: containers ordered by name, chronological within each container.
    fn transform(&self, data: &[HealthMetric]) -> Vec<HealthMetric> {
        let mut by_container: BTreeMap<&str, Vec<&HealthMetric>> = BTreeMap::new();
        for m in data {
            by_container
                .entry(m.container_name.as_str())
                .or_default()
                .push(m);
        }

        let mut out = Vec::with_capacity(data.len().div_ceil(REDUCTION_FACTOR));
        for (_name, mut group) in by_container {
            group.sort_by_key(|m| m.timestamp);
            for chunk in group.chunks(REDUCTION_FACTOR) {
                out.push(reduce_chunk(chunk));
            }
        }
        out
    }
}

/// Collapse one non-empty chunk of a single container's samples.
fn reduce_chunk(refs: &[&HealthMetric]) -> HealthMetric {
    let first = refs[0];

    let counters = ContainerCounters {
        nw_rx_bytes: refs.iter().map(|m| m.counters.nw_rx_bytes).sum(),
        nw_tx_bytes: refs.iter().map(|m| m.counters.nw_tx_bytes).sum(),
        nw_rx_packets: refs.iter().map(|m| m.counters.nw_rx_packets).sum(),
        nw_tx_packets: refs.iter().map(|m| m.counters.nw_tx_packets).sum(),
        nw_rx_errors: refs.iter().map(|m| m.counters.nw_rx_errors).sum(),
        nw_tx_errors: refs.iter().map(|m| m.counters.nw_tx_errors).sum(),
        nw_rx_dropped: refs.iter().map(|m| m.counters.nw_rx_dropped).sum(),
        nw_tx_dropped: refs.iter().map(|m| m.counters.nw_tx_dropped).sum(),
        disk_read_bytes: refs.iter().map(|m| m.counters.disk_read_bytes).sum(),
        disk_write_bytes: refs.iter().map(|m| m.counters.disk_write_bytes).sum(),
        disk_reads: refs.iter().map(|m| m.counters.disk_reads).sum(),
        disk_writes: refs.iter().map(|m| m.counters.disk_writes).sum(),
        restarts: refs.iter().map(|m| m.counters.restarts).sum(),
        memory_usage_bytes: mean_u64(
            &refs
                .iter()
                .map(|m| m.counters.memory_usage_bytes)
                .collect::<Vec<_>>(),
        ),
        memory_limit_bytes: mean_u64(
            &refs
                .iter()
                .map(|m| m.counters.memory_limit_bytes)
                .collect::<Vec<_>>(),
        ),
        memory_percent: mean_f64(&refs.iter().map(|m| m.counters.memory_percent).collect::<Vec<_>>()),
        cpu_percent: mean_f64(&refs.iter().map(|m| m.counters.cpu_percent).collect::<Vec<_>>()),
        system_cpu_usage: mean_u64(
            &refs
                .iter()
                .map(|m| m.counters.system_cpu_usage)
                .collect::<Vec<_>>(),
        ),
        online_cpus: mean_u64(
            &refs
                .iter()
                .map(|m| u64::from(m.counters.online_cpus))
                .collect::<Vec<_>>(),
        ) as u32,
    };

    let compacted_until = refs.iter().map(|m| m.covers_until()).max();

    match refs.iter().rev().find(|m| m.status != ContainerState::Exited) {
        Some(last_alive) => HealthMetric {
            container_name: first.container_name.clone(),
            timestamp: first.timestamp,
            status: last_alive.status,
            health_status: last_alive.health_status.clone(),
            exit_code: last_alive.exit_code,
            started_at: last_alive.started_at,
            finished_at: last_alive.finished_at,
            compacted_until,
            counters,
        },
        // Every sample exited: the bucket becomes a placeholder, prunable once old enough.
        None => HealthMetric {
            container_name: first.container_name.clone(),
            timestamp: first.timestamp,
            status: ContainerState::Exited,
            health_status: None,
            exit_code: refs[refs.len() - 1].exit_code,
            started_at: None,
            finished_at: None,
            compacted_until,
            counters,
        },
    }
}

fn mean_f64(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / (v.len() as f64)
}

fn mean_u64(v: &[u64]) -> u64 {
    if v.is_empty() {
        return 0;
    }
    // Ten host-wide cpu counters can exceed u64::MAX
    let sum: u128 = v.iter().map(|&x| u128::from(x)).sum();
    (sum / v.len() as u128) as u64
}
