//! Backup scheduling, execution and restore for hosting accounts.
//!
//! The binary in `main.rs` wires these modules into an HTTP service and a
//! poll loop; the library target lets `tests/` drive the same code.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
