use chrono::{DateTime, Duration, Utc};

use super::CompactionStrategy;
use crate::models::HealthMetric;

/// Drops exited placeholders (no start/finish time) older than `threshold_days`.
#[derive(Debug, Clone)]
pub struct PruneExitedAfterDays {
    threshold_days: u32,
    now: Option<DateTime<Utc>>,
}

impl PruneExitedAfterDays {
    pub fn new(threshold_days: u32) -> Self {
        Self {
            threshold_days,
            now: None,
        }
    }

    /// Pin the reference time instead of reading the clock on every run.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now) - Duration::days(i64::from(self.threshold_days))
    }
}

impl CompactionStrategy for PruneExitedAfterDays {
    fn name(&self) -> String {
        format!("PruneExitedAfterDays({})", self.threshold_days)
    }

    fn transform(&self, data: &[HealthMetric]) -> Vec<HealthMetric> {
        let cutoff = self.cutoff();
        data.iter()
            .filter(|m| !(m.timestamp < cutoff && m.is_exited_placeholder()))
            .cloned()
            .collect()
    }
}
