//! HTTP handlers for archives and restore jobs.
//! Archive downloads are streamed from disk rather than buffered.

use crate::{
    errors::AppError,
    models::{
        archive::{ArchiveFilter, ArchiveRecord},
        restore::{RestoreJob, RestoreRequest},
    },
    services::backup_service::BackupService,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::{io, path::PathBuf};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// `{path}` body or query used to address one archive.
#[derive(Debug, Deserialize)]
pub struct ArchivePathReq {
    pub path: String,
}

impl ArchivePathReq {
    fn to_path(&self) -> Result<PathBuf, AppError> {
        let path = self.path.trim();
        if path.is_empty() {
            return Err(AppError::bad_request("path is required"));
        }
        Ok(PathBuf::from(path))
    }
}

/// GET `/archives` — supports ?owner=
pub async fn list_archives(
    State(service): State<BackupService>,
    Query(filter): Query<ArchiveFilter>,
) -> Result<Json<Vec<ArchiveRecord>>, AppError> {
    let archives = service.list_archives(filter.owner.as_deref()).await?;
    Ok(Json(archives))
}

/// DELETE `/archives` with body `{"path": ...}`.
pub async fn delete_archive(
    State(service): State<BackupService>,
    Json(req): Json<ArchivePathReq>,
) -> Result<StatusCode, AppError> {
    service.delete_archive(&req.to_path()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/archives/download?path=` — stream an archive file.
pub async fn download_archive(
    State(service): State<BackupService>,
    Query(req): Query<ArchivePathReq>,
) -> Result<Response, AppError> {
    let resolved = service.archive_file(&req.to_path()?).await?;
    let file = match File::open(&resolved).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(AppError::not_found(format!(
                "archive `{}` not found",
                resolved.display()
            )));
        }
        Err(err) => return Err(AppError::internal(err.to_string())),
    };
    let length = file
        .metadata()
        .await
        .map_err(|err| AppError::internal(err.to_string()))?
        .len();
    let file_name = resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/gzip"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&length.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// POST `/restores` — queue a restore, returns the job.
pub async fn start_restore(
    State(service): State<BackupService>,
    Json(req): Json<RestoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    let job = service.start_restore(req).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET `/restores/{id}`
pub async fn get_restore(
    State(service): State<BackupService>,
    Path(id): Path<Uuid>,
) -> Result<Json<RestoreJob>, AppError> {
    Ok(Json(service.restore_job(id).await?))
}
