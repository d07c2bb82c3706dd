//! Builds the task graph from the filesystem and drives the scheduling
//! loop: admit runnable tasks up to the concurrency cap, poll running
//! executors, propagate upstream failure, repeat until every task is
//! terminal.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::constants::{EVENT_LOOP_SLEEP, TASK_FILE_ENDING};
use crate::dag;
use crate::error::SchedulerError;
use crate::executor::{self, ExecutionContext};
use crate::settings::Settings;
use crate::task::{Task, TaskStatus};

/// Scans `insert_dir` for `<schema>.<table>.sql` files and builds one
/// `Task` per file, with dependencies pruned of anything not itself a
/// managed task.
fn parse_tasks(settings: &Settings) -> anyhow::Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for entry in std::fs::read_dir(&settings.insert_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let task_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(TASK_FILE_ENDING).to_lowercase())
            .expect("directory entry always has a file name");
        let dml_text = std::fs::read_to_string(&path)?;
        tasks.push(Task::from_dml_file(&settings.ddl_dir, &settings.insert_dir, task_id, &dml_text));
    }

    let exclusions: HashSet<String> = settings.exclusions.iter().map(|e| e.to_lowercase()).collect();
    tasks.retain(|t| !exclusions.contains(&t.task_id));

    let managed_ids: HashSet<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
    for task in &mut tasks {
        task.prune_second_class_dependencies(&managed_ids);
    }
    Ok(tasks)
}

/// Subsets `tasks` to the requested `--target`s, expanding to the full
/// ancestor closure when `--dependencies` is set; otherwise the targets
/// alone (with dependencies pruned of anything left out of the subset).
fn select_targets(mut tasks: Vec<Task>, settings: &Settings) -> Result<Vec<Task>, SchedulerError> {
    let Some(targets) = &settings.targets else {
        return Ok(tasks);
    };

    let ids: HashSet<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
    let missing: Vec<String> = targets.iter().filter(|t| !ids.contains(*t)).cloned().collect();
    if !missing.is_empty() {
        return Err(SchedulerError::TargetNotFound(missing));
    }

    let keep: HashSet<String> = if settings.dependencies {
        let mut keep = HashSet::new();
        for target in targets {
            keep.extend(dag::ancestor_closure(&tasks, target)?);
        }
        keep
    } else {
        targets.iter().cloned().collect()
    };

    tasks.retain(|t| keep.contains(&t.task_id));
    for task in &mut tasks {
        task.prune_second_class_dependencies(&keep);
    }
    Ok(tasks)
}

fn print_status_line(tasks: &[Task]) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        *counts.entry(task.status.as_str()).or_insert(0) += 1;
    }
    let summary = ["WAITING", "QUEUED", "RUNNING", "SUCCESS", "FAILED", "TEST_FAILED", "UPSTREAM_FAILED"]
        .iter()
        .filter_map(|status| counts.get(status).map(|n| format!("{status}={n}")))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!("{summary}");
}

/// Builds the task graph and, unless `settings.check_only`, runs it to
/// completion. Returns the final task set either way so the caller can
/// report a cycle-free graph or render the full result table.
pub async fn run(settings: Settings) -> anyhow::Result<Vec<Task>> {
    if settings.clear_cache {
        CacheStore::resolve()?.clear()?;
    }

    let tasks = parse_tasks(&settings)?;
    let tasks = select_targets(tasks, &settings)?;

    if let Some(cycle) = dag::detect_cycle(&tasks)? {
        return Err(SchedulerError::CycleFound(cycle).into());
    }

    if settings.check_only {
        return Ok(tasks);
    }

    schedule(tasks, &settings).await
}

async fn schedule(mut tasks: Vec<Task>, settings: &Settings) -> anyhow::Result<Vec<Task>> {
    let managed_ids = Arc::new(tasks.iter().map(|t| t.task_id.clone()).collect::<HashSet<_>>());
    let cache = Arc::new(CacheStore::resolve()?);
    let ctx = Arc::new(ExecutionContext {
        dsn: settings.dsn.clone(),
        stage: settings.stage,
        dev_schema: settings.dev_schema.clone(),
        managed_ids,
        cache,
        no_cache: settings.no_cache,
        refill: settings.refill,
        cache_duration: settings.cache_duration,
        incremental_interval: settings.incremental_interval,
        verbose: settings.verbose,
    });

    let n = tasks.len();
    let mut queue: VecDeque<usize> = VecDeque::new();
    let mut running: HashMap<usize, tokio::task::JoinHandle<executor::TaskOutcome>> = HashMap::new();

    loop {
        // Promote WAITING tasks whose dependencies are all done, or mark
        // them UPSTREAM_FAILED if any dependency terminated in failure.
        for i in 0..n {
            if tasks[i].status != TaskStatus::Waiting {
                continue;
            }
            let mut all_success = true;
            let mut any_failed = false;
            for dep in tasks[i].dependencies.clone() {
                let dep_status = tasks.iter().find(|t| t.task_id == dep).map(|t| t.status);
                match dep_status {
                    Some(status) if status.is_terminal_failure() => {
                        any_failed = true;
                        break;
                    }
                    Some(TaskStatus::Success) => {}
                    _ => all_success = false,
                }
            }
            if any_failed {
                tasks[i].status = TaskStatus::UpstreamFailed;
            } else if all_success {
                tasks[i].status = TaskStatus::Queued;
                queue.push_back(i);
            }
        }

        while running.len() < settings.concurrency {
            let Some(i) = queue.pop_front() else { break };
            tasks[i].status = TaskStatus::Running;
            let task_id = tasks[i].task_id.clone();
            let ddl_path = tasks[i].ddl_path.clone();
            let dml_path = tasks[i].dml_path.clone();
            let ctx = Arc::clone(&ctx);
            let handle = tokio::spawn(async move { executor::run(&task_id, &ddl_path, &dml_path, &ctx).await });
            running.insert(i, handle);
        }

        let finished: Vec<usize> = running.iter().filter(|(_, h)| h.is_finished()).map(|(&i, _)| i).collect();
        for i in finished {
            let handle = running.remove(&i).expect("index came from running");
            match handle.await {
                Ok(outcome) => {
                    tasks[i].status = outcome.status;
                    tasks[i].failed_tests = outcome.failed_tests;
                    tasks[i].timings = outcome.timings;
                }
                Err(join_err) => {
                    tracing::error!(task_id = %tasks[i].task_id, %join_err, "executor task panicked");
                    tasks[i].status = TaskStatus::Failed;
                }
            }
        }

        if !settings.simple_output {
            print_status_line(&tasks);
        }

        if queue.is_empty() && running.is_empty() && tasks.iter().all(|t| t.status.is_terminal()) {
            break;
        }

        tokio::time::sleep(EVENT_LOOP_SLEEP).await;
    }

    Ok(tasks)
}
