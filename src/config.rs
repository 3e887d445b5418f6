use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::event_watcher::BackoffConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub queries: QueriesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Optional cron expression for compaction (6 fields, seconds first; local time).
    #[serde(default)]
    pub compact_schedule: Option<String>,
    /// Run compaction every N seconds when compact_schedule is not set.
    #[serde(default = "default_compact_interval_secs")]
    pub compact_interval_secs: u64,
    /// Only samples older than this are compacted.
    #[serde(default = "default_fourteen_days")]
    pub compact_window_days: u32,
    #[serde(default = "default_fourteen_days")]
    pub prune_exited_after_days: u32,
    #[serde(default)]
    pub cleanup_schedule: Option<String>,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_fourteen_days")]
    pub event_retention_days: u32,
}

fn default_poll_interval_secs() -> u64 {
    600
}

fn default_compact_interval_secs() -> u64 {
    14 * 24 * 3600
}

fn default_cleanup_interval_secs() -> u64 {
    7 * 24 * 3600
}

fn default_fourteen_days() -> u32 {
    14
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            compact_schedule: None,
            compact_interval_secs: default_compact_interval_secs(),
            compact_window_days: default_fourteen_days(),
            prune_exited_after_days: default_fourteen_days(),
            cleanup_schedule: None,
            cleanup_interval_secs: default_cleanup_interval_secs(),
            event_retention_days: default_fourteen_days(),
        }
    }
}

/// Reconnect backoff for the docker event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl EventsConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(self.reconnect_initial_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueriesConfig {
    /// Window served by GET /usage and /usage/{container}.
    #[serde(default = "default_usage_window_days")]
    pub usage_window_days: u32,
}

fn default_usage_window_days() -> u32 {
    7
}

impl Default for QueriesConfig {
    fn default() -> Self {
        Self {
            usage_window_days: default_usage_window_days(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );

        let s = &self.scheduler;
        anyhow::ensure!(
            s.poll_interval_secs > 0,
            "scheduler.poll_interval_secs must be > 0, got {}",
            s.poll_interval_secs
        );
        anyhow::ensure!(
            s.compact_interval_secs > 0,
            "scheduler.compact_interval_secs must be > 0, got {}",
            s.compact_interval_secs
        );
        anyhow::ensure!(
            s.cleanup_interval_secs > 0,
            "scheduler.cleanup_interval_secs must be > 0, got {}",
            s.cleanup_interval_secs
        );
        anyhow::ensure!(
            s.compact_window_days > 0,
            "scheduler.compact_window_days must be > 0, got {}",
            s.compact_window_days
        );
        anyhow::ensure!(
            s.prune_exited_after_days > 0,
            "scheduler.prune_exited_after_days must be > 0, got {}",
            s.prune_exited_after_days
        );
        anyhow::ensure!(
            s.event_retention_days > 0,
            "scheduler.event_retention_days must be > 0, got {}",
            s.event_retention_days
        );
        for (field, expr) in [
            ("scheduler.compact_schedule", &s.compact_schedule),
            ("scheduler.cleanup_schedule", &s.cleanup_schedule),
        ] {
            if let Some(expr) = expr {
                if let Err(e) = cron::Schedule::from_str(expr) {
                    anyhow::bail!("{} is not a valid cron expression ({:?}): {}", field, expr, e);
                }
            }
        }

        anyhow::ensure!(
            self.events.reconnect_initial_ms > 0,
            "events.reconnect_initial_ms must be > 0, got {}",
            self.events.reconnect_initial_ms
        );
        anyhow::ensure!(
            self.events.reconnect_max_ms >= self.events.reconnect_initial_ms,
            "events.reconnect_max_ms must be >= reconnect_initial_ms, got {}",
            self.events.reconnect_max_ms
        );
        anyhow::ensure!(
            self.queries.usage_window_days > 0,
            "queries.usage_window_days must be > 0, got {}",
            self.queries.usage_window_days
        );
        Ok(())
    }
}
