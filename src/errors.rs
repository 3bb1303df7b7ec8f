use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io, path::PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the backup core.
///
/// Variants mirror the units of work of a backup run. Some of them
/// (`SourceUnavailable`, `DumpFailed`, `TransportFailed`, `RetentionError`)
/// are recorded as warnings by the pipeline rather than propagated.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("source `{}` is unavailable", .0.display())]
    SourceUnavailable(PathBuf),
    #[error("dump of database `{database}` failed: {reason}")]
    DumpFailed { database: String, reason: String },
    #[error("database engine error: {0}")]
    DatabaseEngine(String),
    #[error("packaging failed: {0}")]
    PackagingFailed(String),
    #[error("transport failed: {0}")]
    TransportFailed(String),
    #[error("could not delete `{}`: {reason}", .path.display())]
    RetentionError { path: PathBuf, reason: String },
    #[error("archive `{}` not found", .0.display())]
    ArchiveNotFound(PathBuf),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("restore of {step} failed: {reason}")]
    RestoreStepFailed { step: &'static str, reason: String },
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("schedule `{0}` not found")]
    ScheduleNotFound(Uuid),
    #[error("account `{0}` not found")]
    AccountNotFound(Uuid),
    #[error("restore job `{0}` not found")]
    RestoreJobNotFound(Uuid),
    #[error("path `{}` is outside the backups root", .0.display())]
    PathOutsideBackupsRoot(PathBuf),
    #[error("invalid owner name `{0}`")]
    InvalidOwner(String),
    #[error("schedule `{0}` is already running")]
    AlreadyRunning(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackupResult<T> = Result<T, BackupError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        let status = match &err {
            BackupError::ScheduleNotFound(_)
            | BackupError::AccountNotFound(_)
            | BackupError::RestoreJobNotFound(_)
            | BackupError::ArchiveNotFound(_) => StatusCode::NOT_FOUND,
            BackupError::InvalidSchedule(_)
            | BackupError::InvalidOwner(_)
            | BackupError::PathOutsideBackupsRoot(_) => StatusCode::BAD_REQUEST,
            BackupError::AlreadyRunning(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_guard_maps_to_bad_request() {
        let err: AppError = BackupError::PathOutsideBackupsRoot("/etc/passwd".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("/etc/passwd"));
    }

    #[test]
    fn concurrent_run_maps_to_conflict() {
        let err: AppError = BackupError::AlreadyRunning(Uuid::nil()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn unclassified_failures_map_to_internal_error() {
        let err: AppError = BackupError::PackagingFailed("tar: disk full".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("disk full"));
    }
}
