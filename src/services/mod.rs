pub mod accounts;
pub mod archive_builder;
pub mod backup_service;
pub mod catalog;
pub mod command;
pub mod database_engine;
pub mod fs_utils;
pub mod locks;
pub mod packager;
pub mod restore_engine;
pub mod restore_jobs;
pub mod retention;
pub mod schedule_engine;
pub mod schedule_store;
pub mod scheduler;
pub mod transporter;
