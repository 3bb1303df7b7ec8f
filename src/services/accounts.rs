//! Account directory provider: resolves an account id to the paths, ids
//! and databases the backup pipeline works on.

use crate::errors::{BackupError, BackupResult};
use crate::models::account::{Account, AccountRow};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn account(&self, id: Uuid) -> BackupResult<Account>;
}

/// Reads accounts from the panel's `accounts` and `account_databases` tables.
#[derive(Clone)]
pub struct SqliteAccountDirectory {
    db: Arc<SqlitePool>,
}

impl SqliteAccountDirectory {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountDirectory for SqliteAccountDirectory {
    async fn account(&self, id: Uuid) -> BackupResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, username, web_root, mail_dir, uid, gid FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BackupError::AccountNotFound(id),
            other => BackupError::Sqlx(other),
        })?;

        let databases = sqlx::query_scalar::<_, String>(
            "SELECT name FROM account_databases WHERE account_id = ? ORDER BY name",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?;

        Ok(row.into_account(databases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn resolves_account_with_databases() {
        let pool = Arc::new(db::memory_pool().await.unwrap());
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO accounts (id, username, web_root, mail_dir, uid, gid)
             VALUES (?, 'alice', '/home/alice/public_html', '/var/mail/alice', 1001, 1001)",
        )
        .bind(id)
        .execute(&*pool)
        .await
        .unwrap();
        for name in ["alice_wp", "alice_shop"] {
            sqlx::query("INSERT INTO account_databases (account_id, name) VALUES (?, ?)")
                .bind(id)
                .bind(name)
                .execute(&*pool)
                .await
                .unwrap();
        }

        let directory = SqliteAccountDirectory::new(pool);
        let account = directory.account(id).await.unwrap();

        assert_eq!(account.username, "alice");
        assert_eq!(account.uid, Some(1001));
        assert_eq!(account.databases, vec!["alice_shop", "alice_wp"]);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let pool = Arc::new(db::memory_pool().await.unwrap());
        let directory = SqliteAccountDirectory::new(pool);
        let id = Uuid::new_v4();
        assert!(matches!(
            directory.account(id).await,
            Err(BackupError::AccountNotFound(missing)) if missing == id
        ));
    }
}
