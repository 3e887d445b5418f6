// Job scheduler: poll, compact and cleanup on fixed intervals or cron times (local time).
// Each job runs at most once at a time; a run requested while one is in flight is refused.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobId {
    #[serde(rename = "collect_metrics_and_sent_to_db")]
    Poll,
    #[serde(rename = "compact_data_and_update_db")]
    Compact,
    #[serde(rename = "delete_docker_data")]
    Cleanup,
}

impl JobId {
    pub const ALL: [JobId; 3] = [JobId::Poll, JobId::Compact, JobId::Cleanup];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::Poll => "collect_metrics_and_sent_to_db",
            JobId::Compact => "compact_data_and_update_db",
            JobId::Cleanup => "delete_docker_data",
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job id: {0}")]
pub struct UnknownJob(pub String);

impl FromStr for JobId {
    type Err = UnknownJob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownJob(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum Trigger {
    /// First run immediately, then every period.
    Every(Duration),
    /// Cron expression (with seconds field), evaluated in local time.
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    pub fn cron(expr: &str) -> anyhow::Result<Self> {
        let schedule = cron::Schedule::from_str(expr)
            .map_err(|e| anyhow::anyhow!("invalid cron expression {:?}: {}", expr, e))?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }
}

/// How a finished run ended, as recorded in [`LastRun`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunResult {
    Ok { summary: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunResult,
}

/// Reply to an on-demand run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { summary: String },
    Failed { error: String },
    AlreadyRunning,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub enabled: bool,
    pub running: bool,
    pub last_run: Option<LastRun>,
}

pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

struct Job {
    id: JobId,
    trigger: Trigger,
    task: JobFn,
    enabled: AtomicBool,
    running: AtomicBool,
    last_run: RwLock<Option<LastRun>>,
}

/// Lease on a job's running flag. Owns the job so it can outlive whoever asked
/// for the run; dropping it (including by panic) clears the flag.
struct RunningGuard(Arc<Job>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl RunningGuard {
    /// Executes the body and records the result, then releases the lease.
    async fn execute(self) -> RunOutcome {
        let job = &self.0;
        let started_at = Utc::now();
        // Run on its own task so a panicking body is reported as a failure.
        let result = match tokio::spawn((job.task)()).await {
            Ok(Ok(summary)) => RunResult::Ok { summary },
            Ok(Err(e)) => RunResult::Failed {
                error: format!("{:#}", e),
            },
            Err(e) => RunResult::Failed {
                error: format!("job task aborted: {}", e),
            },
        };
        let finished_at = Utc::now();

        match &result {
            RunResult::Ok { summary } => {
                info!(job = %job.id, summary = %summary, "job complete")
            }
            RunResult::Failed { error } => warn!(job = %job.id, error = %error, "job failed"),
        }
        *job.last_run.write().await = Some(LastRun {
            started_at,
            finished_at,
            outcome: result.clone(),
        });

        match result {
            RunResult::Ok { summary } => RunOutcome::Completed { summary },
            RunResult::Failed { error } => RunOutcome::Failed { error },
        }
    }
}

impl Job {
    fn try_lease(self: &Arc<Self>) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(self.clone()))
    }

    /// The run itself lives on a detached task holding the lease: a caller
    /// that stops waiting does not end the run or release the job early.
    async fn run(self: &Arc<Self>) -> RunOutcome {
        if !self.enabled.load(Ordering::Acquire) {
            return RunOutcome::Disabled;
        }
        let Some(lease) = self.try_lease() else {
            return RunOutcome::AlreadyRunning;
        };
        match tokio::spawn(lease.execute()).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed {
                error: format!("job run aborted: {}", e),
            },
        }
    }

    async fn tick(self: &Arc<Self>) {
        match self.run().await {
            RunOutcome::Disabled => debug!(job = %self.id, "job disabled; tick skipped"),
            RunOutcome::AlreadyRunning => {
                info!(job = %self.id, "previous run still in progress; tick skipped")
            }
            RunOutcome::Completed { .. } | RunOutcome::Failed { .. } => {}
        }
    }

    async fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            enabled: self.enabled.load(Ordering::Acquire),
            running: self.running.load(Ordering::Acquire),
            last_run: self.last_run.read().await.clone(),
        }
    }
}

/// Registry of jobs. Built with [`Scheduler::register`], then shared behind an `Arc`.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Arc<Job>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the job for `id`. Jobs start enabled.
    pub fn register<F, Fut>(&mut self, id: JobId, trigger: Trigger, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let task: JobFn = Arc::new(move || task().boxed());
        self.jobs.retain(|j| j.id != id);
        self.jobs.push(Arc::new(Job {
            id,
            trigger,
            task,
            enabled: AtomicBool::new(true),
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }));
    }

    fn job(&self, id: JobId) -> Option<&Arc<Job>> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Registered job ids, in registration order.
    pub fn jobs(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        match self.job(id) {
            Some(job) => Some(job.status().await),
            None => None,
        }
    }

    pub async fn statuses(&self) -> Vec<JobStatus> {
        let mut out = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            out.push(job.status().await);
        }
        out
    }

    /// Returns false if no such job is registered.
    pub fn enable(&self, id: JobId) -> bool {
        self.set_enabled(id, true)
    }

    /// Stops scheduled ticks for `id`. A run already in flight is not interrupted.
    pub fn disable(&self, id: JobId) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: JobId, enabled: bool) -> bool {
        let Some(job) = self.job(id) else {
            return false;
        };
        job.enabled.store(enabled, Ordering::Release);
        info!(job = %id, enabled, "job toggled");
        true
    }

    /// Runs `id` now and waits for the result, subject to the same lease as
    /// scheduled runs. Dropping the returned future does not cancel the run.
    pub async fn run_now(&self, id: JobId) -> Option<RunOutcome> {
        match self.job(id) {
            Some(job) => Some(job.run().await),
            None => None,
        }
    }

    /// One task per job; all stop once shutdown is signalled.
    pub fn spawn(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        self.jobs
            .iter()
            .map(|job| tokio::spawn(run_schedule(job.clone(), shutdown_rx.clone())))
            .collect()
    }
}

async fn run_schedule(job: Arc<Job>, mut shutdown_rx: watch::Receiver<bool>) {
    match &job.trigger {
        Trigger::Every(period) => {
            info!(job = %job.id, period_secs = period.as_secs(), "job scheduled");
            let mut interval = tokio::time::interval(*period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => job.tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
        Trigger::Cron(schedule) => {
            info!(job = %job.id, "job scheduled (cron)");
            loop {
                let now = chrono::Local::now();
                let delay = match schedule.after(&now).next() {
                    Some(next) => (next - now).to_std().unwrap_or(Duration::from_secs(1)),
                    None => {
                        warn!(job = %job.id, "cron schedule has no upcoming time; job will not run");
                        break;
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => job.tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
    }
    debug!(job = %job.id, "job loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_round_trip_through_strings() {
        for id in JobId::ALL {
            assert_eq!(id.as_str().parse::<JobId>().unwrap(), id);
        }
        assert_eq!(
            "nope".parse::<JobId>().unwrap_err(),
            UnknownJob("nope".to_string())
        );
    }

    #[test]
    fn job_id_serializes_as_stable_string() {
        let json = serde_json::to_string(&JobId::Compact).unwrap();
        assert_eq!(json, "\"compact_data_and_update_db\"");
    }

    #[test]
    fn cron_trigger_rejects_garbage() {
        assert!(Trigger::cron("0 0 3 * * *").is_ok());
        assert!(Trigger::cron("every tuesday").is_err());
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let scheduler = Scheduler::new();
        assert!(scheduler.run_now(JobId::Poll).await.is_none());
        assert!(!scheduler.disable(JobId::Poll));
    }
}
