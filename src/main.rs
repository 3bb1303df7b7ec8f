use anyhow::Result;
use axum::Router;
use backupd::{
    config::{AppConfig, Mode},
    db,
    routes::routes::routes,
    services::{
        accounts::SqliteAccountDirectory,
        backup_service::{BackupService, ServiceSettings},
        database_engine::MysqlCli,
        scheduler::Scheduler,
    },
};
use chrono::Local;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting backupd with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Schema (idempotent, also applied before serving) ---
    db::run_migrations(&db).await?;
    if mode == Mode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let engine = Arc::new(MysqlCli::new(cfg.command_timeout()));
    let accounts = Arc::new(SqliteAccountDirectory::new(db.clone()));
    let service = BackupService::new(
        db.clone(),
        engine,
        accounts,
        ServiceSettings {
            backups_root: cfg.backups_root.clone(),
            staging_dir: cfg.staging_dir.clone(),
            system_files_root: cfg.system_files_root.clone(),
            system_mail_dir: cfg.system_mail_dir.clone(),
            command_timeout: cfg.command_timeout(),
        },
    )
    .await?;

    // Index archives written before the index existed.
    service.catalog().import_from_disk().await?;

    let scheduler = Scheduler::new(service.clone(), cfg.poll_interval());

    if mode == Mode::RunOnce {
        let ran = scheduler.run_once(Local::now().naive_local()).await;
        tracing::info!("Run-once finished, {} schedules executed.", ran);
        return Ok(());
    }

    let _poller = scheduler.spawn();

    // --- Build router ---
    let app: Router = routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
