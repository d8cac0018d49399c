//! Dependency Graph
//!
//! Stable topological ordering of tasks. Among tasks whose dependencies are
//! all satisfied, the one declared first goes first.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigurationError;
use crate::task::Task;

/// Dispatch order as task indices into `tasks`
pub fn topological_order(tasks: &[Task]) -> Result<Vec<usize>, ConfigurationError> {
    let index: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect();

    let mut remaining = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];

    for (i, task) in tasks.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &task.depends_on {
            let d = *index
                .get(dep.as_str())
                .ok_or_else(|| ConfigurationError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })?;
            if seen.insert(d) {
                remaining[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut order = Vec::with_capacity(tasks.len());
    let mut done = vec![false; tasks.len()];

    // Quadratic in the worst case; workflows are small and this keeps ties
    // strictly in declaration order.
    while order.len() < tasks.len() {
        let next = (0..tasks.len()).find(|&i| !done[i] && remaining[i] == 0);
        match next {
            Some(i) => {
                done[i] = true;
                order.push(i);
                for &j in &dependents[i] {
                    remaining[j] -= 1;
                }
            }
            None => {
                let path = detect_cycle(tasks).unwrap_or_else(|| {
                    (0..tasks.len())
                        .filter(|&i| !done[i])
                        .map(|i| tasks[i].id.clone())
                        .collect()
                });
                return Err(ConfigurationError::Cycle(path));
            }
        }
    }

    Ok(order)
}

/// First cycle found, walking tasks in declaration order. The returned path
/// starts and ends with the same task id.
pub(crate) fn detect_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    let graph: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.as_slice()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for task in tasks {
        if dfs_cycle(&task.id, &graph, &mut visited, &mut rec_stack, &mut path) {
            // Drop the walk leading into the cycle
            let last = path.last()?.clone();
            let start = path.iter().position(|n| *n == last)?;
            return Some(path.split_off(start));
        }
    }

    None
}

fn dfs_cycle(
    node: &str,
    graph: &HashMap<&str, &[String]>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    let node_str = node.to_string();

    if rec_stack.contains(&node_str) {
        path.push(node_str);
        return true;
    }

    if visited.contains(&node_str) {
        return false;
    }

    visited.insert(node_str.clone());
    rec_stack.insert(node_str.clone());
    path.push(node_str.clone());

    if let Some(deps) = graph.get(node) {
        for dep in deps.iter() {
            if dfs_cycle(dep, graph, visited, rec_stack, path) {
                return true;
            }
        }
    }

    rec_stack.remove(&node_str);
    path.pop();
    false
}
