// Normalize raw Docker inspect + stats responses into a HealthMetric.

use bollard::models::{ContainerInspectResponse, ContainerStatsResponse};
use chrono::{DateTime, Datelike, Utc};

use crate::models::{ContainerCounters, ContainerState, HealthMetric};

/// Build one health sample. Missing sections of the stats response (as for exited
/// containers) read as zero.
pub(crate) fn normalize(
    name: &str,
    inspect: &ContainerInspectResponse,
    s: &ContainerStatsResponse,
    sampled_at: DateTime<Utc>,
) -> HealthMetric {
    let state = inspect.state.as_ref();
    let status = state
        .and_then(|st| st.status.as_ref())
        .map(|st| ContainerState::from_docker(&st.to_string()))
        .unwrap_or(ContainerState::Unknown);
    let health_status = state
        .and_then(|st| st.health.as_ref())
        .and_then(|h| h.status.as_ref())
        .map(|h| h.to_string())
        .filter(|h| !h.is_empty());
    let exit_code = state.and_then(|st| st.exit_code);
    let started_at = state
        .and_then(|st| st.started_at.as_deref())
        .and_then(parse_docker_time);
    let finished_at = state
        .and_then(|st| st.finished_at.as_deref())
        .and_then(parse_docker_time);
    let restarts = inspect.restart_count.unwrap_or(0).max(0) as u64;

    let cpu_stats = s.cpu_stats.as_ref();
    let precpu_stats = s.precpu_stats.as_ref();
    let total = |c: Option<&bollard::models::ContainerCpuStats>| {
        c.and_then(|c| c.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0) as i64
    };
    let system = |c: Option<&bollard::models::ContainerCpuStats>| {
        c.and_then(|c| c.system_cpu_usage).unwrap_or(0) as i64
    };
    let cpu_delta = total(cpu_stats) - total(precpu_stats);
    let system_delta = system(cpu_stats) - system(precpu_stats);
    let online_cpus = cpu_stats.and_then(|c| c.online_cpus).unwrap_or(1);
    let cpu_percent = if system_delta > 0 && cpu_delta > 0 {
        (cpu_delta as f64 / system_delta as f64) * online_cpus as f64 * 100.0
    } else {
        0.0
    };

    let memory_usage_bytes = s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let memory_limit_bytes = s.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0);
    let memory_percent = if memory_limit_bytes > 0 {
        memory_usage_bytes as f64 / memory_limit_bytes as f64 * 100.0
    } else {
        0.0
    };

    let mut counters = ContainerCounters {
        restarts,
        memory_usage_bytes,
        memory_limit_bytes,
        memory_percent,
        cpu_percent,
        system_cpu_usage: system(cpu_stats).max(0) as u64,
        online_cpus,
        ..Default::default()
    };

    if let Some(networks) = s.networks.as_ref() {
        for v in networks.values() {
            counters.nw_rx_bytes += v.rx_bytes.unwrap_or(0);
            counters.nw_tx_bytes += v.tx_bytes.unwrap_or(0);
            counters.nw_rx_packets += v.rx_packets.unwrap_or(0);
            counters.nw_tx_packets += v.tx_packets.unwrap_or(0);
            counters.nw_rx_errors += v.rx_errors.unwrap_or(0);
            counters.nw_tx_errors += v.tx_errors.unwrap_or(0);
            counters.nw_rx_dropped += v.rx_dropped.unwrap_or(0);
            counters.nw_tx_dropped += v.tx_dropped.unwrap_or(0);
        }
    }

    let blkio = s.blkio_stats.as_ref();
    (counters.disk_read_bytes, counters.disk_write_bytes) =
        sum_read_write(blkio.and_then(|b| b.io_service_bytes_recursive.as_ref()));
    (counters.disk_reads, counters.disk_writes) =
        sum_read_write(blkio.and_then(|b| b.io_serviced_recursive.as_ref()));

    HealthMetric {
        container_name: name.trim_start_matches('/').to_string(),
        timestamp: sampled_at,
        status,
        health_status,
        exit_code,
        started_at,
        finished_at,
        compacted_until: None,
        counters,
    }
}

fn sum_read_write(entries: Option<&Vec<bollard::models::ContainerBlkioStatEntry>>) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;
    for e in entries.into_iter().flatten() {
        if e.op
            .as_ref()
            .is_some_and(|op| op.eq_ignore_ascii_case("read"))
        {
            read += e.value.unwrap_or(0);
        } else if e
            .op
            .as_ref()
            .is_some_and(|op| op.eq_ignore_ascii_case("write"))
        {
            write += e.value.unwrap_or(0);
        }
    }
    (read, write)
}

/// Docker reports "0001-01-01T00:00:00Z" for a lifecycle step that never happened.
pub(super) fn parse_docker_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}
