//! Resolves the fully-bound, immutable set of per-invocation knobs.
//!
//! Priority is CLI flag, then environment variable, then hard default —
//! mirroring the original tool's fallback chain. `Settings` is built once,
//! at the top of `main`, and handed to the orchestrator by value.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;

use crate::constants::{
    BASE_CACHE_DURATION_SECS, BASE_CONCURRENCY, BASE_INCREMENTAL_DURATION_DAYS, ENV_CACHE_DURATION, ENV_CONCURRENCY,
    ENV_DDL_DIRECTORY, ENV_DEV_SCHEMA, ENV_DSN, ENV_INCREMENTAL_INTERVAL, ENV_INSERT_DIRECTORY, ENV_SIMPLE_OUTPUT,
    ENV_STAGE, STAGE_DEV, STAGE_PROD,
};
use crate::error::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prod,
    Dev,
}

impl FromStr for Stage {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            STAGE_PROD => Ok(Stage::Prod),
            STAGE_DEV => Ok(Stage::Dev),
            other => Err(SchedulerError::InvalidStage(other.to_string())),
        }
    }
}

/// Raw CLI surface for the `execute` operation (default when no subcommand
/// is given). Every field here is optional at the clap layer; `Settings`
/// resolution is what fills the gaps from environment and defaults.
#[derive(Debug, Args, Default)]
pub struct ExecuteArgs {
    #[arg(long, conflicts_with = "dev")]
    pub prod: bool,

    #[arg(long)]
    pub dev: bool,

    #[arg(long = "dev-schema")]
    pub dev_schema: Option<String>,

    #[arg(short = 't', long = "target")]
    pub target: Vec<String>,

    #[arg(short = 'e', long = "exclusion")]
    pub exclusion: Vec<String>,

    #[arg(long)]
    pub dependencies: bool,

    #[arg(long = "no-cache")]
    pub no_cache: bool,

    #[arg(long)]
    pub refill: bool,

    #[arg(long)]
    pub start: Option<String>,

    #[arg(long)]
    pub end: Option<String>,

    #[arg(long)]
    pub check: bool,

    #[arg(long = "clear-cache")]
    pub clear_cache: bool,

    #[arg(long = "ddl-dir")]
    pub ddl_dir: Option<PathBuf>,

    #[arg(long = "insert-dir")]
    pub insert_dir: Option<PathBuf>,

    #[arg(long)]
    pub dsn: Option<String>,

    #[arg(long = "cache-duration")]
    pub cache_duration: Option<String>,

    #[arg(long)]
    pub concurrency: Option<String>,

    #[arg(long = "simple-output")]
    pub simple_output: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ddl_dir: PathBuf,
    pub insert_dir: PathBuf,
    pub dsn: String,
    pub stage: Stage,
    pub dev_schema: Option<String>,
    pub targets: Option<Vec<String>>,
    pub exclusions: Vec<String>,
    pub dependencies: bool,
    pub no_cache: bool,
    pub refill: bool,
    pub incremental_interval: (DateTime<Utc>, DateTime<Utc>),
    pub check_only: bool,
    pub clear_cache: bool,
    pub cache_duration: Duration,
    pub concurrency: usize,
    pub simple_output: bool,
    pub verbose: bool,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).expect("midnight is always valid").and_utc()
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, SchedulerError> {
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(midnight(date));
    }
    Err(SchedulerError::InvalidIntervalDuration(raw.to_string()))
}

/// `[midnight - N days, next midnight - 1ms]`, the default incremental
/// window when neither `--start` nor `--end` is given.
fn default_incremental_interval() -> (DateTime<Utc>, DateTime<Utc>) {
    let today = midnight(Utc::now().date_naive());
    let start = today - chrono::Duration::days(BASE_INCREMENTAL_DURATION_DAYS);
    let end = today - chrono::Duration::milliseconds(1);
    (start, end)
}

impl Settings {
    pub fn resolve(args: &ExecuteArgs) -> Result<Self, SchedulerError> {
        let stage = if args.dev {
            Stage::Dev
        } else if args.prod {
            Stage::Prod
        } else if let Some(raw) = env_var(ENV_STAGE) {
            Stage::from_str(&raw)?
        } else {
            Stage::Prod
        };

        let dev_schema = args.dev_schema.clone().or_else(|| env_var(ENV_DEV_SCHEMA));
        if stage == Stage::Dev && dev_schema.is_none() {
            return Err(SchedulerError::MissingDevSchema);
        }

        let ddl_dir = args
            .ddl_dir
            .clone()
            .or_else(|| env_var(ENV_DDL_DIRECTORY).map(PathBuf::from))
            .ok_or_else(|| SchedulerError::InvalidDdlDirectory(PathBuf::new()))?;
        if !ddl_dir.is_dir() {
            return Err(SchedulerError::InvalidDdlDirectory(ddl_dir));
        }

        let insert_dir = args
            .insert_dir
            .clone()
            .or_else(|| env_var(ENV_INSERT_DIRECTORY).map(PathBuf::from))
            .ok_or_else(|| SchedulerError::InvalidInsertDirectory(PathBuf::new()))?;
        if !insert_dir.is_dir() {
            return Err(SchedulerError::InvalidInsertDirectory(insert_dir));
        }

        let dsn = args.dsn.clone().or_else(|| env_var(ENV_DSN)).ok_or(SchedulerError::MissingDsn)?;

        let cache_duration = match args.cache_duration.clone().or_else(|| env_var(ENV_CACHE_DURATION)) {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| SchedulerError::InvalidCacheDuration(raw.clone()))?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(BASE_CACHE_DURATION_SECS),
        };

        let concurrency = match args.concurrency.clone().or_else(|| env_var(ENV_CONCURRENCY)) {
            Some(raw) => raw.parse::<usize>().map_err(|_| SchedulerError::InvalidConcurrency(raw.clone()))?,
            None => BASE_CONCURRENCY,
        };

        let incremental_interval = match (&args.start, &args.end) {
            (None, None) => match env_var(ENV_INCREMENTAL_INTERVAL) {
                Some(raw) => {
                    let days: i64 = raw.parse().map_err(|_| SchedulerError::InvalidIntervalDuration(raw.clone()))?;
                    let today = midnight(Utc::now().date_naive());
                    (today - chrono::Duration::days(days), today - chrono::Duration::milliseconds(1))
                }
                None => default_incremental_interval(),
            },
            (start, end) => {
                let default = default_incremental_interval();
                let start = match start {
                    Some(raw) => parse_datetime(raw)?,
                    None => default.0,
                };
                let end = match end {
                    Some(raw) => parse_datetime(raw)?,
                    None => default.1,
                };
                (start, end)
            }
        };

        let simple_output = args.simple_output || env_var(ENV_SIMPLE_OUTPUT).as_deref() == Some("1");

        Ok(Self {
            ddl_dir,
            insert_dir,
            dsn,
            stage,
            dev_schema,
            targets: if args.target.is_empty() { None } else { Some(args.target.clone()) },
            exclusions: args.exclusion.clone(),
            dependencies: args.dependencies,
            no_cache: args.no_cache,
            refill: args.refill,
            incremental_interval,
            check_only: args.check,
            clear_cache: args.clear_cache,
            cache_duration,
            concurrency,
            simple_output,
            verbose: args.verbose,
        })
    }
}
