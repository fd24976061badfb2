//! Job endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use workyard_core::{Job, JobPriority, JobStatus, ResourceId};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/stop", post(stop_job))
        .route("/{id}/retry", post(retry_job))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<JobStatus>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.service.list_jobs(query.status).await?))
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    name: String,
    #[serde(default)]
    priority: JobPriority,
    scheduled_start_time: Option<DateTime<Utc>>,
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state
        .service
        .create_job(&req.name, req.priority, req.scheduled_start_time)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.service.get_job(id).await?))
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.service.stop(id).await?))
}

async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.service.retry(id).await?))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<StatusCode, ApiError> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
