//! Cycle detection and ancestor-closure computation over the task
//! dependency graph.
//!
//! Tasks are addressed by stable integer index into a slice, with adjacency
//! expressed as index lists rather than task-to-task references, so the
//! graph carries no reference cycles regardless of the data's actual
//! acyclicity. Cycle detection is an iterative DFS with an explicit path
//! stack — never the call stack — so a pathological or adversarial input
//! cannot blow the stack.

use std::collections::HashSet;

use crate::error::SchedulerError;
use crate::task::Task;

/// Builds the index-based adjacency list for `tasks`, resolving each
/// dependency id to its index. Any dependency id with no matching task is a
/// fatal configuration error (dangling dependency).
fn build_adjacency(tasks: &[Task]) -> Result<Vec<Vec<usize>>, SchedulerError> {
    let index_of: std::collections::HashMap<&str, usize> =
        tasks.iter().enumerate().map(|(i, t)| (t.task_id.as_str(), i)).collect();

    let mut adjacency = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut deps = Vec::with_capacity(task.dependencies.len());
        for dep in &task.dependencies {
            let Some(&idx) = index_of.get(dep.as_str()) else {
                return Err(SchedulerError::InvalidDependency {
                    task: task.task_id.clone(),
                    dependency: dep.clone(),
                });
            };
            deps.push(idx);
        }
        adjacency.push(deps);
    }
    Ok(adjacency)
}

/// Scans the whole graph for cycles, one DFS per unvisited node so that
/// multiple disjoint cycles are all detected rather than only the first
/// one found. Returns the task ids forming the first cycle encountered, or
/// `None` if the graph is acyclic.
pub fn detect_cycle(tasks: &[Task]) -> Result<Option<Vec<String>>, SchedulerError> {
    let adjacency = build_adjacency(tasks)?;
    let n = tasks.len();

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let mut mark = vec![Mark::Unvisited; n];

    for start in 0..n {
        if mark[start] != Mark::Unvisited {
            continue;
        }

        // Explicit-stack DFS: each frame is (node, next child index to try).
        let mut path: Vec<usize> = vec![start];
        let mut cursor: Vec<usize> = vec![0];
        mark[start] = Mark::InProgress;

        while let Some(&node) = path.last() {
            let children = &adjacency[node];
            let next = cursor.last_mut().unwrap();
            if *next < children.len() {
                let child = children[*next];
                *next += 1;
                match mark[child] {
                    Mark::InProgress => {
                        let cycle_start = path.iter().position(|&n| n == child).unwrap();
                        let cycle: Vec<String> = path[cycle_start..].iter().map(|&i| tasks[i].task_id.clone()).collect();
                        return Ok(Some(cycle));
                    }
                    Mark::Unvisited => {
                        mark[child] = Mark::InProgress;
                        path.push(child);
                        cursor.push(0);
                    }
                    Mark::Done => {}
                }
            } else {
                mark[node] = Mark::Done;
                path.pop();
                cursor.pop();
            }
        }
    }
    Ok(None)
}

/// Transitive ancestor closure of `task_id`, inclusive of the task itself.
pub fn ancestor_closure(tasks: &[Task], task_id: &str) -> Result<HashSet<String>, SchedulerError> {
    let by_id: std::collections::HashMap<&str, &Task> = tasks.iter().map(|t| (t.task_id.as_str(), t)).collect();
    let mut closure = HashSet::new();
    let mut stack = vec![task_id.to_string()];
    while let Some(id) = stack.pop() {
        if !closure.insert(id.clone()) {
            continue;
        }
        let task = by_id.get(id.as_str()).ok_or_else(|| SchedulerError::InvalidDependency {
            task: task_id.to_string(),
            dependency: id.clone(),
        })?;
        for dep in &task.dependencies {
            if !closure.contains(dep) {
                stack.push(dep.clone());
            }
        }
    }
    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use std::path::PathBuf;

    fn task(id: &str, dml: &str) -> Task {
        Task::from_dml_file(&PathBuf::from("ddl"), &PathBuf::from("insert"), id.to_string(), dml)
    }

    fn pruned(tasks: Vec<Task>) -> Vec<Task> {
        let ids: std::collections::HashSet<String> = tasks.iter().map(|t| t.task_id.clone()).collect();
        let mut tasks = tasks;
        for t in &mut tasks {
            t.prune_second_class_dependencies(&ids);
        }
        tasks
    }

    #[test]
    fn empty_graph_has_no_cycle() {
        assert!(detect_cycle(&[]).unwrap().is_none());
    }

    #[test]
    fn simple_chain_has_no_cycle() {
        let tasks = pruned(vec![
            task("public.a", "select 1"),
            task("public.b", "insert into public.b select * from public.a"),
        ]);
        assert!(detect_cycle(&tasks).unwrap().is_none());
    }

    #[test]
    fn direct_two_node_cycle_is_detected() {
        let tasks = pruned(vec![
            task("public.y", "insert into public.y select * from public.z"),
            task("public.z", "insert into public.z select * from public.y"),
        ]);
        let cycle = detect_cycle(&tasks).unwrap();
        assert!(cycle.is_some());
    }

    #[test]
    fn cycle_among_other_acyclic_tasks_is_still_found() {
        let tasks = pruned(vec![
            task("public.a", "select 1"),
            task("public.b", "insert into public.b select * from public.a"),
            task("public.y", "insert into public.y select * from public.z"),
            task("public.z", "insert into public.z select * from public.y"),
        ]);
        assert!(detect_cycle(&tasks).unwrap().is_some());
    }

    #[test]
    fn partially_separated_cycle_is_not_a_cycle() {
        // c1 -> c3, c3 has no dependency back to c1: no cycle when only
        // those two tasks are present (mirrors the "partial separated
        // circle" fixture: the cycle only exists when the connecting third
        // task is also in the set).
        let tasks = pruned(vec![
            task("public.circular_1", "insert into public.circular_1 select * from public.circular_3"),
            task("public.circular_3", "select 1"),
        ]);
        assert!(detect_cycle(&tasks).unwrap().is_none());
    }

    #[test]
    fn dangling_dependency_is_fatal() {
        let mut a = task("public.a", "insert into public.a select * from public.missing");
        // bypass pruning to simulate a configuration bug: a first-class id
        // that slipped through without a matching task.
        a.dependencies.insert("public.missing".to_string());
        let err = detect_cycle(&[a]).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDependency { .. }));
    }

    #[test]
    fn ancestor_closure_includes_self_with_no_deps() {
        let tasks = pruned(vec![task("public.a", "select 1")]);
        let closure = ancestor_closure(&tasks, "public.a").unwrap();
        assert_eq!(closure, ["public.a"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn ancestor_closure_is_transitive() {
        let tasks = pruned(vec![
            task("public.a", "select 1"),
            task("public.b", "insert into public.b select * from public.a"),
            task("public.c", "select 1"),
            task("public.d", "insert into public.d select * from public.b"),
        ]);
        let closure = ancestor_closure(&tasks, "public.d").unwrap();
        assert_eq!(closure, ["public.a", "public.b", "public.d"].iter().map(|s| s.to_string()).collect());
    }
}
