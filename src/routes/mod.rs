// Admin HTTP routes: job control, pipeline introspection and read queries over the store.

mod http;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::collector::PollTrigger;
use crate::compaction::DataCompactManager;
use crate::config::AppConfig;
use crate::docker_repo::DockerRepo;
use crate::metric_repo::SqliteMetricRepo;
use crate::scheduler::Scheduler;

/// Everything the admin surface reads or drives.
pub struct AppDeps {
    pub scheduler: Arc<Scheduler>,
    pub repo: Arc<SqliteMetricRepo>,
    pub pipeline: Arc<DataCompactManager>,
    /// `None` when the container runtime is unreachable; the live routes
    /// (/status, /raw-usage, /container/{name}) then answer 503.
    pub docker: Option<Arc<DockerRepo>>,
    pub trigger: PollTrigger,
    pub config: AppConfig,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) repo: Arc<SqliteMetricRepo>,
    pub(crate) pipeline: Arc<DataCompactManager>,
    pub(crate) docker: Option<Arc<DockerRepo>>,
    pub(crate) trigger: PollTrigger,
    pub(crate) config: AppConfig,
}

pub fn app(deps: AppDeps) -> Router {
    let state = AppState {
        scheduler: deps.scheduler,
        repo: deps.repo,
        pipeline: deps.pipeline,
        docker: deps.docker,
        trigger: deps.trigger,
        config: deps.config,
    };
    Router::new()
        .route("/health", get(http::health_handler))
        .route("/version", get(http::version_handler))
        .route("/jobs", get(http::jobs_handler))
        .route("/job/{id}/status", get(http::job_status_handler))
        .route("/job/{id}/pause", post(http::job_pause_handler))
        .route("/job/{id}/resume", post(http::job_resume_handler))
        .route("/job/{id}/run", post(http::job_run_handler))
        .route("/poll", post(http::poll_handler))
        .route("/pipeline", get(http::pipeline_handler))
        .route("/usage", get(http::usage_handler))
        .route("/usage/{container}", get(http::container_usage_handler))
        .route("/usage/{container}/all", get(http::container_history_handler))
        .route("/events", get(http::events_handler))
        .route("/status", get(http::status_handler))
        .route("/raw-usage", get(http::raw_usage_handler))
        .route("/container/{name}", get(http::container_metadata_handler))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
