#![allow(dead_code)]

use async_trait::async_trait;
use backupd::{
    db,
    errors::{BackupError, BackupResult},
    models::schedule::{Destination, Frequency, JobType, ScheduleRequest},
    services::{
        accounts::SqliteAccountDirectory,
        backup_service::{BackupService, ServiceSettings},
        database_engine::DatabaseEngine,
    },
};
use sqlx::SqlitePool;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

/// In-memory stand-in for the database server.
///
/// Each database is a byte blob; `dump` writes it to the requested file and
/// `restore` reads the file back into the blob.
#[derive(Default)]
pub struct FakeEngine {
    pub databases: Mutex<BTreeMap<String, Vec<u8>>>,
    pub fail_dump: Mutex<Option<String>>,
    pub restored: Mutex<Vec<String>>,
    /// When set, `dump` signals `.0` and waits for `.1`.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeEngine {
    pub fn with_databases(names: &[&str]) -> Self {
        let engine = FakeEngine::default();
        {
            let mut dbs = engine.databases.lock().unwrap();
            for name in names {
                dbs.insert(
                    name.to_string(),
                    format!("CREATE TABLE t (v TEXT); -- {name}\n").into_bytes(),
                );
            }
        }
        engine
    }

    pub fn content(&self, name: &str) -> Option<Vec<u8>> {
        self.databases.lock().unwrap().get(name).cloned()
    }

    pub fn set_content(&self, name: &str, content: &[u8]) {
        self.databases
            .lock()
            .unwrap()
            .insert(name.to_string(), content.to_vec());
    }
}

#[async_trait]
impl DatabaseEngine for FakeEngine {
    async fn list_databases(&self) -> BackupResult<Vec<String>> {
        Ok(self.databases.lock().unwrap().keys().cloned().collect())
    }

    async fn dump(&self, name: &str, dest: &Path) -> BackupResult<()> {
        if let Some((started, release)) = &self.gate {
            started.notify_one();
            release.notified().await;
        }
        if self.fail_dump.lock().unwrap().as_deref() == Some(name) {
            return Err(BackupError::DumpFailed {
                database: name.to_string(),
                reason: "mysqldump: Got error: 1044: Access denied".into(),
            });
        }
        let content = self
            .content(name)
            .ok_or_else(|| BackupError::DatabaseEngine(format!("unknown database {name}")))?;
        tokio::fs::write(dest, content).await?;
        Ok(())
    }

    async fn restore(&self, name: &str, source: &Path) -> BackupResult<()> {
        let content = tokio::fs::read(source).await?;
        self.set_content(name, &content);
        self.restored.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub db: Arc<SqlitePool>,
    pub engine: Arc<FakeEngine>,
    pub service: BackupService,
}

impl Fixture {
    pub async fn new(engine: FakeEngine) -> Self {
        Self::with_mail_dir(engine, None).await
    }

    pub async fn with_mail_dir(engine: FakeEngine, system_mail_dir: Option<PathBuf>) -> Self {
        let tmp = TempDir::new().unwrap();
        let db = Arc::new(db::memory_pool().await.unwrap());
        let engine = Arc::new(engine);
        let system_files_root = tmp.path().join("etc");
        std::fs::create_dir_all(&system_files_root).unwrap();
        std::fs::write(system_files_root.join("hostname"), b"panel01\n").unwrap();

        let service = BackupService::new(
            db.clone(),
            engine.clone(),
            Arc::new(SqliteAccountDirectory::new(db.clone())),
            ServiceSettings {
                backups_root: tmp.path().join("backups"),
                staging_dir: tmp.path().join("staging"),
                system_files_root,
                system_mail_dir,
                command_timeout: Duration::from_secs(60),
            },
        )
        .await
        .unwrap();

        Self {
            tmp,
            db,
            engine,
            service,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.tmp.path().join(rel)
    }

    /// Insert an account whose web root and mail dir live under the fixture.
    pub async fn account(&self, username: &str, databases: &[&str]) -> Uuid {
        let id = Uuid::new_v4();
        let web_root = self.path(&format!("home/{username}/public_html"));
        let mail_dir = self.path(&format!("mail/{username}"));
        sqlx::query(
            "INSERT INTO accounts (id, username, web_root, mail_dir, uid, gid)
             VALUES (?, ?, ?, ?, NULL, NULL)",
        )
        .bind(id)
        .bind(username)
        .bind(web_root.to_string_lossy().as_ref())
        .bind(mail_dir.to_string_lossy().as_ref())
        .execute(&*self.db)
        .await
        .unwrap();
        for name in databases {
            sqlx::query("INSERT INTO account_databases (account_id, name) VALUES (?, ?)")
                .bind(id)
                .bind(*name)
                .execute(&*self.db)
                .await
                .unwrap();
        }
        id
    }

    /// Populate an account's web root and mailbox with a few files.
    pub fn seed_content(&self, username: &str) {
        let web_root = self.path(&format!("home/{username}/public_html"));
        std::fs::create_dir_all(web_root.join("wp-content/uploads")).unwrap();
        std::fs::write(web_root.join("index.php"), b"<?php require 'wp-blog-header.php';").unwrap();
        std::fs::write(
            web_root.join("wp-content/uploads/logo.png"),
            [0x89, b'P', b'N', b'G', 0, 1, 2, 3],
        )
        .unwrap();

        let mail_dir = self.path(&format!("mail/{username}"));
        std::fs::create_dir_all(mail_dir.join("cur")).unwrap();
        std::fs::write(mail_dir.join("cur/1700000000.M1P1.panel"), b"Subject: hi\n\nhello").unwrap();
    }
}

pub fn account_request(account_id: Uuid, job_type: JobType) -> ScheduleRequest {
    ScheduleRequest {
        name: format!("{} backup", job_type.as_str()),
        account_id: Some(account_id),
        is_system: false,
        job_type,
        frequency: Frequency::Daily,
        day_of_week: None,
        day_of_month: None,
        time_of_day: "02:00".into(),
        retention_days: 7,
        destination: Destination::Local,
        enabled: true,
    }
}

pub fn system_request(job_type: JobType) -> ScheduleRequest {
    ScheduleRequest {
        name: "system backup".into(),
        account_id: None,
        is_system: true,
        ..account_request(Uuid::nil(), job_type)
    }
}

/// Entries of a `.tar.gz`, as listed by `tar -tzf`.
pub fn tar_entries(archive: &Path) -> Vec<String> {
    let output = std::process::Command::new("tar")
        .arg("-tzf")
        .arg(archive)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| line.trim_start_matches("./").to_string())
        .collect()
}
