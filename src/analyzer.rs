//! SQL text analysis: comment stripping, dependency extraction, dev-stage
//! identifier rewriting and incremental-marker detection.
//!
//! Every operation here is a pure text transform over case-insensitive regex
//! matching — deliberately not an AST parse. See the module-level design note
//! on why: dependencies are declarations about other managed artifacts, not
//! full SQL semantics, and the scheme is conservative by construction.

use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::LazyLock;

static BLOCK_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static FROM_JOIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)((?:from|join)\s+)"?(\w+)"?\s*\.\s*"?(\w+)"?"#).unwrap());

static CREATE_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(create\s+table\s+(?:if\s+not\s+exists\s+)?)"?(\w+)"?\s*\.\s*"?(\w+)"?"#).unwrap());

static DROP_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(drop\s+table\s+(?:if\s+exists\s+)?)"?(\w+)"?\s*\.\s*"?(\w+)"?"#).unwrap());

static DELETE_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(delete\s+from\s+)"?(\w+)"?\s*\.\s*"?(\w+)"?"#).unwrap());

static INSERT_INTO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(insert\s+into\s+)"?(\w+)"?\s*\.\s*"?(\w+)"?"#).unwrap());

static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?i)(update\s+)"?(\w+)"?\s*\.\s*"?(\w+)"?"#).unwrap());

static INCREMENTAL_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*--sql-scheduler-incremental").unwrap());

pub const INCREMENTAL_MARKER: &str = "--sql-scheduler-incremental";

/// Strips `/* ... */` block comments and `-- ...` line comments.
///
/// Block comments are removed first, non-greedily, across newlines. A `--`
/// immediately preceded by a single quote is left untouched so that string
/// literals containing `--` survive — a deliberately crude heuristic, not a
/// quote-aware scanner, and the known limitation is intentional.
pub fn strip_comments(text: &str) -> String {
    let without_block = BLOCK_COMMENT_RE.replace_all(text, "");
    strip_line_comments(&without_block)
}

fn strip_line_comments(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.split('\n') {
        out.push(strip_line_comment(line));
    }
    out.join("\n")
}

fn strip_line_comment(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut search_from = 0usize;
    loop {
        match line[search_from..].find("--") {
            None => return line.to_string(),
            Some(rel_pos) => {
                let pos = search_from + rel_pos;
                let preceded_by_quote = pos > 0 && bytes[pos - 1] == b'\'';
                if preceded_by_quote {
                    search_from = pos + 2;
                    continue;
                }
                return line[..pos].to_string();
            }
        }
    }
}

/// Extracts the set of lowercase `schema.table` identifiers referenced by
/// `FROM` or `JOIN`, excluding `DELETE FROM` matches. Comments are stripped
/// first so embedded directive text never leaks into the dependency set.
pub fn extract_dependencies(text: &str) -> HashSet<String> {
    let stripped = strip_comments(text);
    let mut deps = HashSet::new();
    for caps in FROM_JOIN_RE.captures_iter(&stripped) {
        let whole = caps.get(0).unwrap();
        let keyword = caps.get(1).unwrap().as_str();
        if keyword.to_ascii_lowercase().trim_start().starts_with("from") && is_preceded_by_delete(&stripped, whole.start()) {
            continue;
        }
        let schema = caps.get(2).unwrap().as_str().to_lowercase();
        let table = caps.get(3).unwrap().as_str().to_lowercase();
        deps.insert(format!("{schema}.{table}"));
    }
    deps
}

fn is_preceded_by_delete(text: &str, match_start: usize) -> bool {
    let before = text[..match_start].trim_end();
    let lower = before.to_ascii_lowercase();
    if !lower.ends_with("delete") {
        return false;
    }
    let delete_start = lower.len() - "delete".len();
    delete_start == 0 || !lower.as_bytes()[delete_start - 1].is_ascii_alphanumeric()
}

/// True iff the raw (un-stripped) text begins with the incremental marker.
pub fn is_incremental(text: &str) -> bool {
    INCREMENTAL_MARKER_RE.is_match(text)
}

/// Rewrites identifiers for the dev-schema overlay, applying the six
/// construct families in the fixed order: CREATE TABLE, DROP TABLE,
/// FROM/JOIN, DELETE FROM, INSERT INTO, UPDATE.
pub fn rewrite_for_dev(text: &str, managed_ids: &HashSet<String>, dev_schema: &str) -> String {
    let text = rewrite_unconditional(text, &CREATE_TABLE_RE, dev_schema);
    let text = rewrite_unconditional(&text, &DROP_TABLE_RE, dev_schema);
    let text = rewrite_from_join(&text, managed_ids, dev_schema);
    let text = rewrite_unconditional(&text, &DELETE_FROM_RE, dev_schema);
    let text = rewrite_unconditional(&text, &INSERT_INTO_RE, dev_schema);
    rewrite_unconditional(&text, &UPDATE_RE, dev_schema)
}

fn rewrite_unconditional(text: &str, re: &Regex, dev_schema: &str) -> String {
    re.replace_all(text, |caps: &Captures| {
        let prefix = &caps[1];
        let table = &caps[3];
        format!("{prefix}{dev_schema}.{table}")
    })
    .into_owned()
}

fn rewrite_from_join(text: &str, managed_ids: &HashSet<String>, dev_schema: &str) -> String {
    FROM_JOIN_RE
        .replace_all(text, |caps: &Captures| {
            let schema = caps[2].to_lowercase();
            let table = caps[3].to_lowercase();
            let key = format!("{schema}.{table}");
            if managed_ids.contains(&key) {
                let prefix = &caps[1];
                format!("{prefix}{dev_schema}.{table}")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strips_block_and_line_comments() {
        let text = "select 1 /* multi\nline */ from public.a -- trailing comment\nwhere 1=1";
        let stripped = strip_comments(text);
        assert!(!stripped.contains("multi"));
        assert!(!stripped.contains("trailing comment"));
        assert!(stripped.contains("from public.a"));
    }

    #[test]
    fn preserves_quoted_dashdash_in_string_literal() {
        let text = "select '--not a comment' as x -- real comment\n";
        let stripped = strip_comments(text);
        assert!(stripped.contains("'--not a comment'"));
        assert!(!stripped.contains("real comment"));
    }

    #[test]
    fn extracts_single_from() {
        let deps = extract_dependencies("select * from public.table_a");
        assert_eq!(deps, set(&["public.table_a"]));
    }

    #[test]
    fn extracts_multiple_from_and_joins_case_insensitively() {
        let deps = extract_dependencies(
            "SELECT * FROM Public.Table_A a\nINNER JOIN public.table_b b ON a.id = b.id\nLEFT JOIN public.table_c c ON b.id = c.id",
        );
        assert_eq!(deps, set(&["public.table_a", "public.table_b", "public.table_c"]));
    }

    #[test]
    fn delete_from_is_not_a_dependency() {
        let deps = extract_dependencies("DELETE FROM public.table_a WHERE 1=1");
        assert!(deps.is_empty());
    }

    #[test]
    fn delete_from_with_extra_whitespace_is_not_a_dependency() {
        let deps = extract_dependencies("DELETE   FROM public.table_a WHERE 1=1");
        assert!(deps.is_empty());
    }

    #[test]
    fn comment_stripping_does_not_change_extracted_dependencies() {
        let text = "select * from public.a -- join public.z\n/* from public.y */ join public.b on true";
        assert_eq!(extract_dependencies(text), extract_dependencies(&strip_comments(text)));
    }

    #[test]
    fn detects_incremental_marker() {
        assert!(is_incremental("--sql-scheduler-incremental\nselect 1"));
        assert!(is_incremental("  --SQL-SCHEDULER-INCREMENTAL\nselect 1"));
        assert!(!is_incremental("select 1 --sql-scheduler-incremental"));
    }

    #[test]
    fn rewrite_for_dev_replaces_create_and_drop_unconditionally() {
        let managed = set(&[]);
        let text = "CREATE TABLE IF NOT EXISTS public.a (id int);\nDROP TABLE IF EXISTS public.a;";
        let rewritten = rewrite_for_dev(text, &managed, "dev_schema");
        assert!(rewritten.contains("CREATE TABLE IF NOT EXISTS dev_schema.a"));
        assert!(rewritten.contains("DROP TABLE IF EXISTS dev_schema.a"));
    }

    #[test]
    fn rewrite_for_dev_only_rewrites_managed_from_join() {
        let managed = set(&["public.table_b"]);
        let text = "INSERT INTO public.a SELECT * FROM public.table_b JOIN public.table_unmanaged ON true";
        let rewritten = rewrite_for_dev(text, &managed, "dev_schema");
        assert!(rewritten.contains("FROM dev_schema.table_b"));
        assert!(rewritten.contains("JOIN public.table_unmanaged"));
        assert!(rewritten.contains("INSERT INTO dev_schema.a"));
    }

    #[test]
    fn rewrite_for_dev_handles_quoted_identifiers() {
        let managed = set(&["public.table_b"]);
        let text = r#"SELECT * FROM "public"."table_b""#;
        let rewritten = rewrite_for_dev(text, &managed, "dev_schema");
        assert!(rewritten.contains("FROM dev_schema.table_b"));
    }

    #[test]
    fn rewrite_for_dev_is_idempotent_when_dev_schema_unmanaged() {
        let managed = set(&["public.table_b"]);
        let text = "INSERT INTO public.a SELECT * FROM public.table_b";
        let once = rewrite_for_dev(text, &managed, "dev_schema");
        let twice = rewrite_for_dev(&once, &managed, "dev_schema");
        assert_eq!(once, twice);
    }

    #[test]
    fn rewrite_for_dev_update_and_delete() {
        let managed = set(&[]);
        let text = "DELETE FROM public.a WHERE 1=1;\nUPDATE public.a SET x = 1;";
        let rewritten = rewrite_for_dev(text, &managed, "dev_schema");
        assert!(rewritten.contains("DELETE FROM dev_schema.a"));
        assert!(rewritten.contains("UPDATE dev_schema.a"));
    }
}
