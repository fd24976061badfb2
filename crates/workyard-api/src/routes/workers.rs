//! Worker endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use workyard_core::{ResourceId, Worker};
use workyard_scheduler::{InFlight, PassSummary};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workers).post(register_worker))
        .route("/process-queue", post(process_queue))
        .route("/in-flight", get(in_flight))
        .route("/{id}", get(get_worker))
}

async fn list_workers(State(state): State<AppState>) -> Result<Json<Vec<Worker>>, ApiError> {
    Ok(Json(state.service.list_workers().await?))
}

#[derive(Debug, Deserialize)]
struct RegisterWorkerRequest {
    name: String,
}

async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> Result<(StatusCode, Json<Worker>), ApiError> {
    let worker = state.service.register_worker(&req.name).await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Worker>, ApiError> {
    Ok(Json(state.service.get_worker(id).await?))
}

async fn process_queue(State(state): State<AppState>) -> Json<PassSummary> {
    Json(state.service.process_queue().await)
}

async fn in_flight(State(state): State<AppState>) -> Json<Vec<InFlight>> {
    Json(state.service.in_flight())
}
