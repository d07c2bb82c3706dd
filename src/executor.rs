//! Drives a single task from QUEUED to a terminal state.
//!
//! The pipeline is a fixed sequence of async steps; any DB or I/O error
//! terminates the task as FAILED without running later steps, and an
//! assertion failure terminates it as TEST_FAILED. This reads like a linear
//! sequence of awaits — the intended mapping is to a concurrent job
//! (an async task here) that suspends at each DB round-trip while its
//! siblings and the scheduler loop make progress.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::analyzer;
use crate::assertions;
use crate::cache::{self, CacheStore};
use crate::db::Connection;
use crate::settings::Stage;
use crate::task::{TaskStatus, TaskTimings};

pub struct ExecutionContext {
    pub dsn: String,
    pub stage: Stage,
    pub dev_schema: Option<String>,
    pub managed_ids: Arc<HashSet<String>>,
    pub cache: Arc<CacheStore>,
    pub no_cache: bool,
    pub refill: bool,
    pub cache_duration: Duration,
    pub incremental_interval: (DateTime<Utc>, DateTime<Utc>),
    pub verbose: bool,
}

pub struct TaskOutcome {
    pub status: TaskStatus,
    pub failed_tests: Vec<String>,
    pub timings: TaskTimings,
}

impl TaskOutcome {
    fn failed(timings: TaskTimings) -> Self {
        Self {
            status: TaskStatus::Failed,
            failed_tests: Vec::new(),
            timings,
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn timestamp_literal(ts: &DateTime<Utc>) -> String {
    format!("'{}'::timestamp", ts.format("%Y-%m-%d %H:%M:%S"))
}

fn substitute_interval(text: &str, interval: &(DateTime<Utc>, DateTime<Utc>)) -> String {
    text.replace("$1", &timestamp_literal(&interval.0)).replace("$2", &timestamp_literal(&interval.1))
}

/// Runs the full per-task pipeline described in the component design.
pub async fn run(task_id: &str, ddl_path: &Path, dml_path: &Path, ctx: &ExecutionContext) -> TaskOutcome {
    let mut timings = TaskTimings {
        start_timestamp: Some(now_secs()),
        ..Default::default()
    };

    // Step 2: read DDL and DML text; missing file -> FAILED.
    let Ok(ddl_text) = std::fs::read_to_string(ddl_path) else {
        tracing::warn!(task_id, ?ddl_path, "ddl file missing");
        return TaskOutcome::failed(timings);
    };
    let Ok(dml_text) = std::fs::read_to_string(dml_path) else {
        tracing::warn!(task_id, ?dml_path, "dml file missing");
        return TaskOutcome::failed(timings);
    };

    let incremental = analyzer::is_incremental(&dml_text);

    // Step 3: incremental $1/$2 substitution.
    let mut ddl_text = ddl_text;
    let mut dml_text = dml_text;
    if incremental {
        ddl_text = substitute_interval(&ddl_text, &ctx.incremental_interval);
        dml_text = substitute_interval(&dml_text, &ctx.incremental_interval);
    }

    let (schema, table) = task_id.split_once('.').expect("task_id is always schema.table");
    let effective_schema = match (&ctx.stage, &ctx.dev_schema) {
        (Stage::Dev, Some(dev_schema)) => dev_schema.as_str(),
        _ => schema,
    };

    // Step 4: dev-stage rewrite, then cache check.
    let cache_key;
    if matches!(ctx.stage, Stage::Dev) {
        let dev_schema = ctx.dev_schema.as_deref().expect("dev stage always carries a dev_schema");
        ddl_text = analyzer::rewrite_for_dev(&ddl_text, &ctx.managed_ids, dev_schema);
        dml_text = analyzer::rewrite_for_dev(&dml_text, &ctx.managed_ids, dev_schema);
        cache_key = Some(cache::cache_key(&ddl_text, &dml_text));

        if !ctx.no_cache {
            if let Some(key) = &cache_key {
                if ctx.cache.is_fresh(task_id, key, ctx.cache_duration) {
                    tracing::info!(task_id, "cached");
                    return TaskOutcome {
                        status: TaskStatus::Success,
                        failed_tests: Vec::new(),
                        timings,
                    };
                }
            }
        }
    } else {
        cache_key = None;
    }

    // Step 5: upstream assertions, run concurrently, barrier before DML.
    timings.upstream_test_start_timestamp = Some(now_secs());
    let upstream_start = Instant::now();
    let mut failed_tests = Vec::new();
    let upstream_counts = assertions::parse_upstream_counts(&dml_text);
    let upstream_granularities = assertions::parse_upstream_granularities(&dml_text);

    let count_futures = upstream_counts.iter().map(|d| assertions::run_upstream_count(&ctx.dsn, d, ctx.verbose));
    let granularity_futures = upstream_granularities
        .iter()
        .map(|d| assertions::run_upstream_granularity(&ctx.dsn, d, ctx.verbose));
    let (count_results, granularity_results) = futures::join!(join_all(count_futures), join_all(granularity_futures));
    for (passed, name) in count_results.into_iter().chain(granularity_results) {
        if !passed {
            failed_tests.push(name);
        }
    }
    timings.upstream_test_duration = Some(upstream_start.elapsed().as_secs_f64());

    if !failed_tests.is_empty() {
        return TaskOutcome {
            status: TaskStatus::TestFailed,
            failed_tests,
            timings,
        };
    }

    // Step 6-7: connect, determine creation need, run DDL/DML/ANALYZE in a transaction.
    let script_start = Instant::now();
    let mut conn = match Connection::open(&ctx.dsn).await {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(task_id, %err, "failed to connect");
            return TaskOutcome::failed(timings);
        }
    };

    let needs_creation = if incremental && !ctx.refill {
        match conn
            .client
            .query_opt(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
                &[&effective_schema, &table],
            )
            .await
        {
            Ok(row) => row.is_none(),
            Err(err) => {
                tracing::warn!(task_id, %err, "existence probe failed");
                return TaskOutcome::failed(timings);
            }
        }
    } else {
        true
    };

    let run_ddl = !incremental || ctx.refill || needs_creation;

    let result = run_transaction(&mut conn, &ddl_text, &dml_text, effective_schema, table, run_ddl, ctx.verbose).await;
    if let Err(err) = result {
        tracing::warn!(task_id, %err, "task pipeline failed");
        return TaskOutcome::failed(timings);
    }
    drop(conn);
    timings.script_duration = Some(script_start.elapsed().as_secs_f64());

    // Step 8: downstream assertions.
    timings.test_start_timestamp = Some(now_secs());
    let test_start = Instant::now();
    let granularity = assertions::parse_granularity(&dml_text);
    let not_null = assertions::parse_not_null(&dml_text);
    let relationships = assertions::parse_relationships(&dml_text);

    // The relationship probe's right-hand schema is only dev-overridden when
    // this run is itself in dev stage, regardless of whether a dev schema
    // happens to be configured (it can be set but unused in a prod run).
    let dev_schema_opt = if matches!(ctx.stage, Stage::Dev) { ctx.dev_schema.as_deref() } else { None };
    let granularity_fut = async {
        match &granularity {
            Some(cols) => vec![assertions::run_granularity(&ctx.dsn, effective_schema, table, cols, ctx.verbose).await],
            None => Vec::new(),
        }
    };
    let not_null_fut = async {
        match &not_null {
            Some(cols) => vec![assertions::run_not_null(&ctx.dsn, effective_schema, table, cols, ctx.verbose).await],
            None => Vec::new(),
        }
    };
    let relationship_futs = relationships.iter().map(|rel| {
        assertions::run_relationship(&ctx.dsn, effective_schema, table, rel, &ctx.managed_ids, dev_schema_opt, ctx.verbose)
    });

    let (granularity_results, not_null_results, relationship_results) =
        futures::join!(granularity_fut, not_null_fut, join_all(relationship_futs));

    for (passed, name) in granularity_results.into_iter().chain(not_null_results).chain(relationship_results) {
        if !passed {
            failed_tests.push(name);
        }
    }
    timings.test_duration = Some(test_start.elapsed().as_secs_f64());

    if !failed_tests.is_empty() {
        return TaskOutcome {
            status: TaskStatus::TestFailed,
            failed_tests,
            timings,
        };
    }

    // Step 9: record cache on success, dev stage only.
    if matches!(ctx.stage, Stage::Dev) && !ctx.no_cache {
        if let Some(key) = &cache_key {
            if let Err(err) = ctx.cache.record(task_id, key) {
                tracing::warn!(task_id, %err, "failed to write cache record");
            }
        }
    }

    TaskOutcome {
        status: TaskStatus::Success,
        failed_tests: Vec::new(),
        timings,
    }
}

async fn run_transaction(
    conn: &mut Connection,
    ddl_text: &str,
    dml_text: &str,
    effective_schema: &str,
    table: &str,
    run_ddl: bool,
    verbose: bool,
) -> Result<(), tokio_postgres::Error> {
    let transaction = conn.client.transaction().await?;
    if run_ddl {
        if verbose {
            tracing::debug!(sql = ddl_text, "executing ddl");
        }
        transaction.batch_execute(ddl_text).await?;
    }
    if verbose {
        tracing::debug!(sql = dml_text, "executing dml");
    }
    transaction.batch_execute(dml_text).await?;

    let analyze_sql = format!("ANALYZE \"{effective_schema}\".\"{table}\"");
    if verbose {
        tracing::debug!(sql = %analyze_sql, "executing analyze");
    }
    transaction.batch_execute(&analyze_sql).await?;

    transaction.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn substitutes_incremental_interval_markers() {
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 1, 2, 23, 59, 59).unwrap();
        let rewritten = substitute_interval("WHERE ts BETWEEN $1 AND $2", &(start, end));
        assert_eq!(
            rewritten,
            "WHERE ts BETWEEN '2023-01-01 00:00:00'::timestamp AND '2023-01-02 23:59:59'::timestamp"
        );
    }
}
