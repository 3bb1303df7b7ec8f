//! Core data models for the backup service.
//!
//! Persisted entities map to SQLite tables via `sqlx::FromRow` and
//! serialize as JSON via `serde` for the admin API.

pub mod account;
pub mod archive;
pub mod restore;
pub mod run;
pub mod schedule;
