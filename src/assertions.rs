//! Declarative data-quality assertion directives: parsing from SQL comments
//! and translation into probe SQL queries.
//!
//! Every probe returns rows iff the asserted property is violated (success
//! is zero rows), except `upstream_count`, which compares a row count
//! against a threshold. Each probe opens and closes its own connection; no
//! pooling is used, matching the executor's own connection discipline.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::db;

static GRANULARITY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)granularity:([\w, ]*)").unwrap());
static NOT_NULL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)not_null:([\w, ]*)").unwrap());
static RELATIONSHIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)relationship:\s?([\w]+\s?=\s?[\w]+\.[\w]+\.[\w]+)").unwrap());
static UPSTREAM_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)upstream_count:\s*([\w]+)\.([\w]+)\s+(\d+)(?:\s|\*)").unwrap());
static UPSTREAM_GRANULARITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)upstream_granularity:\s*([\w]+)\.([\w]+)\s+([\w, ]+)").unwrap());

fn split_columns(raw: &str) -> Vec<String> {
    raw.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect()
}

pub struct Relationship {
    pub column: String,
    pub r_schema: String,
    pub r_table: String,
    pub r_column: String,
}

impl Relationship {
    fn parse(raw: &str) -> Option<Self> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let (column, rhs) = compact.split_once('=')?;
        let mut parts = rhs.splitn(3, '.');
        let r_schema = parts.next()?.to_string();
        let r_table = parts.next()?.to_string();
        let r_column = parts.next()?.to_string();
        Some(Self {
            column: column.to_string(),
            r_schema,
            r_table,
            r_column,
        })
    }

    fn label(&self) -> String {
        format!("relationship_({}={}.{}.{})", self.column, self.r_schema, self.r_table, self.r_column)
    }
}

pub struct UpstreamCount {
    pub schema: String,
    pub table: String,
    pub min: i64,
}

pub struct UpstreamGranularity {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
}

pub fn parse_granularity(text: &str) -> Option<Vec<String>> {
    GRANULARITY_RE.captures(text).map(|c| split_columns(&c[1]))
}

pub fn parse_not_null(text: &str) -> Option<Vec<String>> {
    NOT_NULL_RE.captures(text).map(|c| split_columns(&c[1]))
}

pub fn parse_relationships(text: &str) -> Vec<Relationship> {
    RELATIONSHIP_RE.captures_iter(text).filter_map(|c| Relationship::parse(&c[1])).collect()
}

pub fn parse_upstream_counts(text: &str) -> Vec<UpstreamCount> {
    UPSTREAM_COUNT_RE
        .captures_iter(text)
        .filter_map(|c| {
            let schema = c[1].to_string();
            let table = c[2].to_string();
            // An unparsable threshold appends a synthetic failure and keeps
            // going rather than aborting the whole directive scan.
            match c[3].parse::<i64>() {
                Ok(min) => Some(UpstreamCount { schema, table, min }),
                Err(_) => Some(UpstreamCount { schema, table, min: i64::MAX }),
            }
        })
        .collect()
}

pub fn parse_upstream_granularities(text: &str) -> Vec<UpstreamGranularity> {
    UPSTREAM_GRANULARITY_RE
        .captures_iter(text)
        .map(|c| UpstreamGranularity {
            schema: c[1].to_string(),
            table: c[2].to_string(),
            columns: split_columns(&c[3]),
        })
        .collect()
}

fn log_probe(verbose: bool, sql: &str) {
    if verbose {
        tracing::debug!(sql, "executing probe");
    }
}

pub async fn run_granularity(dsn: &str, schema: &str, table: &str, columns: &[String], verbose: bool) -> (bool, String) {
    let label = format!("granularity_({})", columns.join(","));
    let sql = format!(
        "SELECT {cols} FROM \"{schema}\".\"{table}\" GROUP BY {cols} HAVING count(1) > 1 LIMIT 1",
        cols = columns.join(","),
    );
    log_probe(verbose, &sql);
    match db::probe_empty(dsn, &sql).await {
        Ok(passed) => (passed, label),
        Err(_) => (false, label),
    }
}

pub async fn run_not_null(dsn: &str, schema: &str, table: &str, columns: &[String], verbose: bool) -> (bool, String) {
    let label = format!("not-null_({})", columns.join(","));
    let predicate = columns.iter().map(|c| format!("\"{c}\" IS NULL ")).collect::<Vec<_>>().join("AND ");
    let sql = format!("SELECT 1 FROM \"{schema}\".\"{table}\" WHERE {predicate} LIMIT 1");
    log_probe(verbose, &sql);
    match db::probe_empty(dsn, &sql).await {
        Ok(passed) => (passed, label),
        Err(_) => (false, label),
    }
}

/// `relationship`'s right-hand schema is dev-overridden only when that table
/// is itself managed and the task is running in dev stage.
pub async fn run_relationship(
    dsn: &str,
    schema: &str,
    table: &str,
    rel: &Relationship,
    managed_ids: &HashSet<String>,
    dev_schema: Option<&str>,
    verbose: bool,
) -> (bool, String) {
    let label = rel.label();
    let r_schema = if let Some(dev_schema) = dev_schema {
        let key = format!("{}.{}", rel.r_schema.to_lowercase(), rel.r_table.to_lowercase());
        if managed_ids.contains(&key) {
            dev_schema
        } else {
            &rel.r_schema
        }
    } else {
        &rel.r_schema
    };
    let sql = format!(
        "SELECT 1 FROM \"{schema}\".\"{table}\" AS a LEFT JOIN \"{r_schema}\".\"{r_table}\" AS b ON a.\"{column}\" = b.\"{r_column}\" WHERE b.\"{r_column}\" IS NULL LIMIT 1",
        r_table = rel.r_table,
        column = rel.column,
        r_column = rel.r_column,
    );
    log_probe(verbose, &sql);
    match db::probe_empty(dsn, &sql).await {
        Ok(passed) => (passed, label),
        Err(_) => (false, label),
    }
}

pub async fn run_upstream_count(dsn: &str, directive: &UpstreamCount, verbose: bool) -> (bool, String) {
    let label = format!("upstream_count_({}.{})", directive.schema, directive.table);
    let sql = format!("SELECT count(1) FROM \"{}\".\"{}\"", directive.schema, directive.table);
    log_probe(verbose, &sql);
    match db::probe_count(dsn, &sql).await {
        Ok(count) => (count > directive.min, label),
        Err(_) => (false, label),
    }
}

pub async fn run_upstream_granularity(dsn: &str, directive: &UpstreamGranularity, verbose: bool) -> (bool, String) {
    let label = format!("upstream_granularity_({}.{}:{})", directive.schema, directive.table, directive.columns.join(","));
    let cols = directive.columns.join(",");
    let sql = format!(
        "SELECT {cols} FROM \"{}\".\"{}\" GROUP BY {cols} HAVING count(1) > 1 LIMIT 1",
        directive.schema, directive.table,
    );
    log_probe(verbose, &sql);
    match db::probe_empty(dsn, &sql).await {
        Ok(passed) => (passed, label),
        Err(_) => (false, label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_granularity_columns() {
        let cols = parse_granularity("-- granularity:column_a, column_b\nselect 1").unwrap();
        assert_eq!(cols, vec!["column_a", "column_b"]);
    }

    #[test]
    fn absent_granularity_is_none() {
        assert!(parse_granularity("select 1").is_none());
    }

    #[test]
    fn parses_not_null_columns() {
        let cols = parse_not_null("-- not_null:a,b,c\nselect 1").unwrap();
        assert_eq!(cols, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_relationship_directive() {
        let rels = parse_relationships("-- relationship: user_id = public.users.id\nselect 1");
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].column, "user_id");
        assert_eq!(rels[0].r_schema, "public");
        assert_eq!(rels[0].r_table, "users");
        assert_eq!(rels[0].r_column, "id");
    }

    #[test]
    fn parses_multiple_relationship_directives() {
        let rels = parse_relationships(
            "-- relationship: a_id = public.a.id\n-- relationship: b_id = public.b.id\nselect 1",
        );
        assert_eq!(rels.len(), 2);
    }

    #[test]
    fn parses_upstream_count_directive() {
        let directives = parse_upstream_counts("-- upstream_count: public.source 100\nselect 1");
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].schema, "public");
        assert_eq!(directives[0].table, "source");
        assert_eq!(directives[0].min, 100);
    }

    #[test]
    fn parses_upstream_granularity_directive() {
        let directives = parse_upstream_granularities("-- upstream_granularity: public.source id, other_id\nselect 1");
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].columns, vec!["id", "other_id"]);
    }
}
