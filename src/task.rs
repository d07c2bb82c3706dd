//! Per-script task state: identity, dependency set, timings, and the
//! directives harvested from its DML for the assertion runner.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::analyzer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Queued,
    Running,
    Success,
    Failed,
    TestFailed,
    UpstreamFailed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed | TaskStatus::TestFailed | TaskStatus::UpstreamFailed)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::TestFailed | TaskStatus::UpstreamFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::TestFailed => "TEST_FAILED",
            TaskStatus::UpstreamFailed => "UPSTREAM_FAILED",
        }
    }
}

/// Per-task timing samples, all optional until the corresponding pipeline
/// step has run.
#[derive(Debug, Clone, Default)]
pub struct TaskTimings {
    pub start_timestamp: Option<f64>,
    pub script_duration: Option<f64>,
    pub test_start_timestamp: Option<f64>,
    pub test_duration: Option<f64>,
    pub upstream_test_start_timestamp: Option<f64>,
    pub upstream_test_duration: Option<f64>,
}

/// One managed table, defined by a paired DDL and DML script named
/// `<schema>.<table>.sql`. `task_id` is always lowercase.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub ddl_path: PathBuf,
    pub dml_path: PathBuf,
    pub dependencies: HashSet<String>,
    pub incremental: bool,
    pub status: TaskStatus,
    pub failed_tests: Vec<String>,
    pub timings: TaskTimings,
}

impl Task {
    /// Builds a task from its DML file, reading it once to derive
    /// `dependencies` and `incremental`. `dependencies` is not yet pruned of
    /// second-class entries — the orchestrator does that once every task id
    /// is known.
    pub fn from_dml_file(ddl_dir: &Path, insert_dir: &Path, task_id: String, dml_text: &str) -> Self {
        let dependencies = analyzer::extract_dependencies(dml_text);
        let incremental = analyzer::is_incremental(dml_text);
        let ddl_path = ddl_dir.join(format!("{task_id}.sql"));
        let dml_path = insert_dir.join(format!("{task_id}.sql"));
        Self {
            task_id,
            ddl_path,
            dml_path,
            dependencies,
            incremental,
            status: TaskStatus::Waiting,
            failed_tests: Vec::new(),
            timings: TaskTimings::default(),
        }
    }

    /// Discards dependencies that are not themselves managed tasks —
    /// "second-class" references pruned before scheduling.
    pub fn prune_second_class_dependencies(&mut self, managed_ids: &HashSet<String>) {
        self.dependencies.retain(|dep| managed_ids.contains(dep));
    }

    /// Splits `task_id` (`schema.table`, already lowercase) into its parts.
    pub fn schema_table(&self) -> (&str, &str) {
        self.task_id.split_once('.').expect("task_id is always schema.table")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builds_task_with_dependencies_and_incremental_flag() {
        let task = Task::from_dml_file(
            &PathBuf::from("ddl"),
            &PathBuf::from("insert"),
            "public.b".to_string(),
            "--sql-scheduler-incremental\nINSERT INTO public.b SELECT * FROM public.a",
        );
        assert_eq!(task.task_id, "public.b");
        assert!(task.incremental);
        assert!(task.dependencies.contains("public.a"));
        assert_eq!(task.status, TaskStatus::Waiting);
    }

    #[test]
    fn prunes_second_class_dependencies() {
        let mut task = Task::from_dml_file(
            &PathBuf::from("ddl"),
            &PathBuf::from("insert"),
            "public.b".to_string(),
            "INSERT INTO public.b SELECT * FROM public.a JOIN external.unmanaged ON true",
        );
        let managed: HashSet<String> = ["public.a", "public.b"].iter().map(|s| s.to_string()).collect();
        task.prune_second_class_dependencies(&managed);
        assert_eq!(task.dependencies, ["public.a"].iter().map(|s| s.to_string()).collect());
    }
}
