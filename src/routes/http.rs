// JSON handlers for the admin surface

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::warn;

use super::AppState;
use crate::docker_repo::DockerRepo;
use crate::models::{ContainerMetadata, DockerEvent, HealthMetric};
use crate::scheduler::{JobId, JobStatus, RunOutcome, UnknownJob};
use crate::version::{NAME, VERSION};

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error(transparent)]
    UnknownJob(#[from] UnknownJob),
    #[error("job {0} is not registered")]
    NotRegistered(JobId),
    #[error("container {0} not found")]
    ContainerNotFound(String),
    #[error("{0}")]
    Unavailable(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownJob(_)
            | ApiError::NotRegistered(_)
            | ApiError::ContainerNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(e) => {
                warn!(error = %e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}

/// GET /health
pub(super) async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

pub(super) async fn jobs_handler(State(state): State<AppState>) -> Json<Vec<JobStatus>> {
    Json(state.scheduler.statuses().await)
}

pub(super) async fn job_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let id: JobId = id.parse()?;
    state
        .scheduler
        .status(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotRegistered(id))
}

pub(super) async fn job_pause_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: JobId = id.parse()?;
    if !state.scheduler.disable(id) {
        return Err(ApiError::NotRegistered(id));
    }
    Ok(Json(
        serde_json::json!({ "message": format!("Job {} paused", id) }),
    ))
}

pub(super) async fn job_resume_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: JobId = id.parse()?;
    if !state.scheduler.enable(id) {
        return Err(ApiError::NotRegistered(id));
    }
    Ok(Json(
        serde_json::json!({ "message": format!("Job {} resumed", id) }),
    ))
}

/// POST /job/{id}/run: runs the job to completion before answering.
pub(super) async fn job_run_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunOutcome>, ApiError> {
    let id: JobId = id.parse()?;
    state
        .scheduler
        .run_now(id)
        .await
        .map(Json)
        .ok_or(ApiError::NotRegistered(id))
}

/// POST /poll: queues a background poll; merged into one already pending.
pub(super) async fn poll_handler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.trigger.request();
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "outcome": outcome })),
    )
}

pub(super) async fn pipeline_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "strategies": state.pipeline.strategies() }))
}

pub(super) async fn usage_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<HealthMetric>>, ApiError> {
    let since = Utc::now() - Duration::days(i64::from(state.config.queries.usage_window_days));
    Ok(Json(state.repo.recent_health_metrics(since, None).await?))
}

pub(super) async fn container_usage_handler(
    State(state): State<AppState>,
    Path(container): Path<String>,
) -> Result<Json<Vec<HealthMetric>>, ApiError> {
    let since = Utc::now() - Duration::days(i64::from(state.config.queries.usage_window_days));
    Ok(Json(
        state
            .repo
            .recent_health_metrics(since, Some(&container))
            .await?,
    ))
}

pub(super) async fn container_history_handler(
    State(state): State<AppState>,
    Path(container): Path<String>,
) -> Result<Json<Vec<HealthMetric>>, ApiError> {
    Ok(Json(
        state.repo.health_metrics_for_container(&container).await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct EventFilter {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    action: Option<String>,
}

impl EventFilter {
    fn matches(&self, e: &DockerEvent) -> bool {
        self.kind
            .as_deref()
            .is_none_or(|k| e.kind.as_str().eq_ignore_ascii_case(k))
            && self.name.as_deref().is_none_or(|n| e.actor_name == n)
            && self.action.as_deref().is_none_or(|a| e.action == a)
    }
}

/// GET /events?type=&name=&action=: events within the retention window.
pub(super) async fn events_handler(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<Vec<DockerEvent>>, ApiError> {
    let since =
        Utc::now() - Duration::days(i64::from(state.config.scheduler.event_retention_days));
    let events = state.repo.docker_events_since(since).await?;
    Ok(Json(
        events.into_iter().filter(|e| filter.matches(e)).collect(),
    ))
}

fn runtime(state: &AppState) -> Result<&DockerRepo, ApiError> {
    state
        .docker
        .as_deref()
        .ok_or(ApiError::Unavailable("container runtime not connected"))
}

/// GET /status: live container name → state, straight from the runtime.
pub(super) async fn status_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(runtime(&state)?.live_status().await?))
}

/// GET /raw-usage: a fresh sample of every container; nothing is stored.
pub(super) async fn raw_usage_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<HealthMetric>>, ApiError> {
    Ok(Json(runtime(&state)?.sample_all().await?))
}

pub(super) async fn container_metadata_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ContainerMetadata>, ApiError> {
    runtime(&state)?
        .metadata(&name)
        .await?
        .map(Json)
        .ok_or(ApiError::ContainerNotFound(name))
}
