//! Defines routes for the backup admin API.
//!
//! ## Structure
//! - **Schedules**
//!   - `GET    /schedules` — list (supports is_system, is_enabled)
//!   - `POST   /schedules` — create
//!   - `GET    /schedules/{id}` / `PUT` / `DELETE`
//!   - `POST   /schedules/{id}/toggle` — flip enabled
//!   - `POST   /schedules/{id}/run` — run now
//!   - `GET    /schedules/{id}/next-run`
//!
//! - **Archives and restores**
//!   - `GET    /archives` — list (supports owner)
//!   - `DELETE /archives` — delete by `{path}`
//!   - `GET    /archives/download?path=` — stream an archive
//!   - `POST   /restores` — start a restore job
//!   - `GET    /restores/{id}` — restore job status
//!
//! - `GET /stats`, `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        archive_handlers::{
            delete_archive, download_archive, get_restore, list_archives, start_restore,
        },
        health_handlers::{healthz, readyz},
        schedule_handlers::{
            create_schedule, delete_schedule, get_schedule, list_schedules, next_run,
            run_schedule, stats, toggle_schedule, update_schedule,
        },
    },
    services::backup_service::BackupService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. Every handler shares the `BackupService` state.
pub fn routes() -> Router<BackupService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Schedules
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/schedules/{id}",
            get(get_schedule)
                .put(update_schedule)
                .delete(delete_schedule),
        )
        .route("/schedules/{id}/toggle", post(toggle_schedule))
        .route("/schedules/{id}/run", post(run_schedule))
        .route("/schedules/{id}/next-run", get(next_run))
        // Archives
        .route("/archives", get(list_archives).delete(delete_archive))
        .route("/archives/download", get(download_archive))
        // Restores
        .route("/restores", post(start_restore))
        .route("/restores/{id}", get(get_restore))
        .route("/stats", get(stats))
}
