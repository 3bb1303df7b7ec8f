//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness: SQLite, backups root writable, `tar` on PATH

use crate::services::backup_service::BackupService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, 503 otherwise. The body lists each
/// check with its error.
pub async fn readyz(State(service): State<BackupService>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(service.db())
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    // Write/read/delete a probe file under the backups root.
    let probe = service
        .catalog()
        .root()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let backups_root = match fs::write(&probe, b"readyz").await {
        Ok(_) => {
            let read = fs::read(&probe).await;
            let removed = fs::remove_file(&probe).await;
            match (read, removed) {
                (Ok(bytes), Ok(_)) if bytes == b"readyz" => CheckStatus::ok(),
                (Ok(_), Ok(_)) => CheckStatus::failed("file content mismatch".into()),
                (Err(e), _) => CheckStatus::failed(format!("could not read probe file: {}", e)),
                (_, Err(e)) => CheckStatus::failed(format!("could not remove probe file: {}", e)),
            }
        }
        Err(e) => CheckStatus::failed(format!("could not write probe file: {}", e)),
    };

    let tar = match which::which("tar") {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("tar not found: {}", e)),
    };

    let mut checks = BTreeMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("backups_root", backups_root);
    checks.insert("tar", tar);

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
