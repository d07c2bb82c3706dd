//! Typed, per-kind errors raised before or around task execution.
//!
//! These cover the fatal configuration and scheduling errors named in the
//! external interface contract. Per-task outcomes (FAILED, TEST_FAILED,
//! UPSTREAM_FAILED) are never represented here; they live on `Task::status`
//! and are data, not control flow.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("DDL directory does not exist or is not a directory: {0}")]
    InvalidDdlDirectory(PathBuf),

    #[error("insert directory does not exist or is not a directory: {0}")]
    InvalidInsertDirectory(PathBuf),

    #[error("no DSN provided (set --dsn or SQL_SCHEDULER_DSN)")]
    MissingDsn,

    #[error("stage is 'dev' but no dev schema provided (set --dev-schema or SQL_SCHEDULER_DEV_SCHEMA)")]
    MissingDevSchema,

    #[error("invalid stage '{0}', expected 'prod' or 'dev'")]
    InvalidStage(String),

    #[error("invalid concurrency value '{0}'")]
    InvalidConcurrency(String),

    #[error("invalid cache duration value '{0}'")]
    InvalidCacheDuration(String),

    #[error("invalid incremental interval duration '{0}'")]
    InvalidIntervalDuration(String),

    #[error("circular dependency found between tasks ({})", .0.join(", "))]
    CycleFound(Vec<String>),

    #[error("target task(s) not found: {}", .0.join(", "))]
    TargetNotFound(Vec<String>),

    #[error("task {task} has a non-existent dependency {dependency}")]
    InvalidDependency { task: String, dependency: String },
}
