//! Parallel work detection
//!
//! Topological layering of a task dependency graph. Each layer holds tasks
//! whose dependencies all sit in earlier layers, so a layer can run in
//! parallel.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{AceflowError, AceflowResult};

/// Group tasks into dependency layers using Kahn's algorithm
///
/// Layers come back in execution order and each layer keeps the input
/// order of `tasks`. Dependencies on ids outside `tasks` are treated as
/// already resolved. Duplicate task ids and dependency cycles are rejected.
pub fn detect_parallel_opportunities(
    tasks: &[String],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> AceflowResult<Vec<Vec<String>>> {
    let mut task_ids: HashSet<&str> = HashSet::new();
    for task in tasks {
        if task.trim().is_empty() {
            return Err(AceflowError::validation("task ids cannot be empty"));
        }
        if !task_ids.insert(task.as_str()) {
            return Err(AceflowError::validation(format!(
                "task '{}' is listed more than once",
                task
            )));
        }
    }

    // Build adjacency list and in-degree count
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        let Some(deps) = dependencies.get(task) else {
            continue;
        };
        let unique: HashSet<&str> = deps.iter().map(String::as_str).collect();
        for dep in unique {
            if !task_ids.contains(dep) {
                // Dependency outside the task set - treat as already resolved
                continue;
            }
            *in_degree.entry(task.as_str()).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(task.as_str());
        }
    }

    let mut remaining: Vec<&str> = tasks.iter().map(String::as_str).collect();
    let mut layers = Vec::new();

    // Process nodes with in-degree 0 layer by layer
    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&str>, Vec<&str>) = remaining
            .iter()
            .copied()
            .partition(|id| in_degree.get(*id).copied().unwrap_or(0) == 0);

        if ready.is_empty() {
            return Err(AceflowError::validation(format!(
                "dependency cycle among tasks: {}",
                blocked.join(", ")
            )));
        }

        for id in &ready {
            if let Some(next) = dependents.get(id) {
                for dependent in next {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
        }

        layers.push(ready.iter().map(|id| id.to_string()).collect());
        remaining = blocked;
    }

    Ok(layers)
}
