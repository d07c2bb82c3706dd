//! Final-summary rendering: a per-task timing table plus failure listings.

use prettytable::{row, Table};

use crate::task::{Task, TaskStatus};

/// Renders one row per task that actually ran (excludes tasks left WAITING
/// by an upstream failure that never reached the executor), sorted by start
/// time. Missing durations print as `-1.0`, matching the original report.
pub fn render_table(tasks: &[Task]) -> Table {
    let mut ran: Vec<&Task> = tasks.iter().filter(|t| t.timings.start_timestamp.is_some()).collect();
    ran.sort_by(|a, b| a.timings.start_timestamp.partial_cmp(&b.timings.start_timestamp).unwrap());

    let mut table = Table::new();
    table.add_row(row!["task_id", "script duration (s)", "test duration (s)"]);
    for task in ran {
        table.add_row(row![
            task.task_id,
            format!("{:.1}", task.timings.script_duration.unwrap_or(-1.0)),
            format!("{:.1}", task.timings.test_duration.unwrap_or(-1.0)),
        ]);
    }
    table
}

pub struct FailureSummary {
    pub failed: Vec<String>,
    /// `(task_id, failed assertion names)`, e.g. `granularity_(column_a)`.
    pub test_failed: Vec<(String, Vec<String>)>,
    pub upstream_failed: Vec<String>,
}

impl FailureSummary {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut failed = Vec::new();
        let mut test_failed = Vec::new();
        let mut upstream_failed = Vec::new();
        for task in tasks {
            match task.status {
                TaskStatus::Failed => failed.push(task.task_id.clone()),
                TaskStatus::TestFailed => test_failed.push((task.task_id.clone(), task.failed_tests.clone())),
                TaskStatus::UpstreamFailed => upstream_failed.push(task.task_id.clone()),
                _ => {}
            }
        }
        Self { failed, test_failed, upstream_failed }
    }

    pub fn exit_code(&self) -> i32 {
        (self.failed.len() + self.test_failed.len() + self.upstream_failed.len()) as i32
    }

    pub fn print(&self) {
        if !self.failed.is_empty() {
            println!("FAILED: {}", self.failed.join(", "));
        }
        for (task_id, failed_tests) in &self.test_failed {
            println!("TEST_FAILED: {}: {}", task_id, failed_tests.join(","));
        }
        if !self.upstream_failed.is_empty() {
            println!("UPSTREAM_FAILED: {}", self.upstream_failed.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task_with_status(id: &str, status: TaskStatus) -> Task {
        let mut task = Task::from_dml_file(&PathBuf::from("ddl"), &PathBuf::from("insert"), id.to_string(), "select 1");
        task.status = status;
        task
    }

    #[test]
    fn exit_code_sums_failure_categories() {
        let tasks = vec![
            task_with_status("public.a", TaskStatus::Failed),
            task_with_status("public.b", TaskStatus::TestFailed),
            task_with_status("public.c", TaskStatus::UpstreamFailed),
            task_with_status("public.d", TaskStatus::Success),
        ];
        let summary = FailureSummary::from_tasks(&tasks);
        assert_eq!(summary.exit_code(), 3);
    }

    #[test]
    fn all_success_is_zero_exit_code() {
        let tasks = vec![task_with_status("public.a", TaskStatus::Success)];
        assert_eq!(FailureSummary::from_tasks(&tasks).exit_code(), 0);
    }

    #[test]
    fn test_failed_carries_its_failed_assertion_names() {
        let mut task = task_with_status("public.a", TaskStatus::TestFailed);
        task.failed_tests = vec!["granularity_(column_a)".to_string(), "not-null_(column_b)".to_string()];
        let summary = FailureSummary::from_tasks(&[task]);
        assert_eq!(summary.test_failed.len(), 1);
        assert_eq!(summary.test_failed[0].0, "public.a");
        assert_eq!(
            summary.test_failed[0].1,
            vec!["granularity_(column_a)".to_string(), "not-null_(column_b)".to_string()]
        );
    }
}
