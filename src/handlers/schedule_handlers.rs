//! HTTP handlers for schedule management, manual runs and statistics.

use crate::{
    errors::AppError,
    models::{
        run::{BackupStats, RunOutcome},
        schedule::{BackupSchedule, ScheduleFilter, ScheduleRequest},
    },
    services::backup_service::BackupService,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

/// Body of `GET /schedules/{id}/next-run`.
#[derive(Debug, Serialize)]
pub struct NextRunResponse {
    pub schedule_id: Uuid,
    pub next_run: Option<DateTime<Local>>,
}

/// GET `/schedules` — supports ?is_system=&is_enabled=
pub async fn list_schedules(
    State(service): State<BackupService>,
    Query(filter): Query<ScheduleFilter>,
) -> Result<Json<Vec<BackupSchedule>>, AppError> {
    Ok(Json(service.schedules().list(&filter).await?))
}

/// POST `/schedules`
pub async fn create_schedule(
    State(service): State<BackupService>,
    Json(req): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let schedule = service.create_schedule(&req).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// GET `/schedules/{id}`
pub async fn get_schedule(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackupSchedule>, AppError> {
    Ok(Json(service.schedules().get(id).await?))
}

/// PUT `/schedules/{id}`
pub async fn update_schedule(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<BackupSchedule>, AppError> {
    Ok(Json(service.update_schedule(id, &req).await?))
}

/// DELETE `/schedules/{id}`
pub async fn delete_schedule(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    service.schedules().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/schedules/{id}/toggle`
pub async fn toggle_schedule(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackupSchedule>, AppError> {
    Ok(Json(service.schedules().toggle(id).await?))
}

/// POST `/schedules/{id}/run` — runs to completion; 409 while a run is in flight.
pub async fn run_schedule(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunOutcome>, AppError> {
    Ok(Json(service.run_schedule(id).await?))
}

/// GET `/schedules/{id}/next-run`
pub async fn next_run(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
) -> Result<Json<NextRunResponse>, AppError> {
    let next_run = service.next_run(id).await?;
    Ok(Json(NextRunResponse {
        schedule_id: id,
        next_run,
    }))
}

/// GET `/stats`
pub async fn stats(State(service): State<BackupService>) -> Result<Json<BackupStats>, AppError> {
    Ok(Json(service.stats().await?))
}
