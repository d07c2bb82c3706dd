//! Default knob values and environment variable names.
//!
//! Mirrors the fallback chain documented in the external interfaces section:
//! flags override environment, environment overrides these defaults.

use std::time::Duration;

pub const ENVVAR_PREFIX: &str = "SQL_SCHEDULER";

pub const ENV_DDL_DIRECTORY: &str = "SQL_SCHEDULER_DDL_DIRECTORY";
pub const ENV_INSERT_DIRECTORY: &str = "SQL_SCHEDULER_INSERT_DIRECTORY";
pub const ENV_DSN: &str = "SQL_SCHEDULER_DSN";
pub const ENV_STAGE: &str = "SQL_SCHEDULER_STAGE";
pub const ENV_DEV_SCHEMA: &str = "SQL_SCHEDULER_DEV_SCHEMA";
pub const ENV_SIMPLE_OUTPUT: &str = "SQL_SCHEDULER_SIMPLE_OUTPUT";
pub const ENV_CACHE_DURATION: &str = "SQL_SCHEDULER_CACHE_DURATION";
pub const ENV_INCREMENTAL_INTERVAL: &str = "SQL_SCHEDULER_INCREMENTAL_INTERVAL";
pub const ENV_CONCURRENCY: &str = "SQL_SCHEDULER_CONCURRENCY";

pub const STAGE_PROD: &str = "prod";
pub const STAGE_DEV: &str = "dev";

pub const TASK_FILE_ENDING: &str = ".sql";

/// Scheduling loop poll cadence.
pub const EVENT_LOOP_SLEEP: Duration = Duration::from_millis(250);

pub const BASE_CACHE_DURATION_SECS: u64 = 6 * 60 * 60;
pub const BASE_INCREMENTAL_DURATION_DAYS: i64 = 14;
pub const BASE_CONCURRENCY: usize = 4;

pub const CACHE_DIR_RELATIVE: &str = ".sql-scheduler/cache";
