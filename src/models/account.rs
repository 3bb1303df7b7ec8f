//! Hosting accounts as seen by the backup core.

use serde::Serialize;
use sqlx::FromRow;
use std::path::PathBuf;
use uuid::Uuid;

/// Everything the backup pipeline needs to know about an account.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub web_root: PathBuf,
    pub mail_dir: PathBuf,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Databases owned by the account.
    pub databases: Vec<String>,
}

/// Row of the `accounts` table.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub username: String,
    pub web_root: String,
    pub mail_dir: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl AccountRow {
    pub fn into_account(self, databases: Vec<String>) -> Account {
        Account {
            id: self.id,
            username: self.username,
            web_root: PathBuf::from(self.web_root),
            mail_dir: PathBuf::from(self.mail_dir),
            uid: self.uid,
            gid: self.gid,
            databases,
        }
    }
}
