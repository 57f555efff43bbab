//! Execution group planner.
//!
//! Levels the dependency graph Kahn-style: a task becomes a candidate for a
//! level once every dependency sits in a strictly earlier level. Candidates
//! are accepted in input order; one that writes a file already claimed by an
//! accepted task is demoted to a later level instead of failing.

use crate::core::{DependencyGraph, InferredEdge, TaskId};
use crate::error::{Error, Result};
use crate::wlog_debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A batch of tasks that can run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    /// Zero-based level.
    pub index: usize,
    /// Ordered by priority (descending), then input order.
    pub task_ids: Vec<TaskId>,
}

impl ExecutionGroup {
    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.task_ids.contains(id)
    }
}

/// A task pushed past a level because it writes a file another task in that
/// level already writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demotion {
    pub task_id: TaskId,
    /// Level the task was eligible for.
    pub from_level: usize,
    /// Accepted task holding the conflicting files.
    pub conflicts_with: TaskId,
    pub files: Vec<String>,
}

/// Ordered groups covering every task exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
    pub inferred_edges: Vec<InferredEdge>,
    pub demotions: Vec<Demotion>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.groups.iter().map(ExecutionGroup::len).sum()
    }

    /// Level of the group containing `id`.
    pub fn group_of(&self, id: &TaskId) -> Option<usize> {
        self.groups
            .iter()
            .find(|g| g.contains(id))
            .map(|g| g.index)
    }

    pub fn max_parallelism(&self) -> usize {
        self.groups.iter().map(ExecutionGroup::len).max().unwrap_or(0)
    }
}

/// Compute the execution plan for a validated graph.
///
/// Deterministic for a fixed input. Errors only if the graph still contains
/// tasks that can never become candidates, which a successfully built graph
/// rules out.
pub fn plan(graph: &DependencyGraph) -> Result<ExecutionPlan> {
    let mut placed: HashMap<&TaskId, usize> = HashMap::new();
    let mut unplaced: Vec<&TaskId> = graph.tasks().map(|t| &t.id).collect();
    let mut groups = Vec::new();
    let mut demotions = Vec::new();

    while !unplaced.is_empty() {
        let level = groups.len();
        let mut accepted: Vec<&TaskId> = Vec::new();
        let mut claimed: HashMap<&str, &TaskId> = HashMap::new();

        for &id in &unplaced {
            let ready = graph
                .dependencies(id)
                .iter()
                .all(|dep| placed.get(dep).is_some_and(|&l| l < level));
            if !ready {
                continue;
            }

            let Some(task) = graph.get_task(id) else {
                continue;
            };
            let holder = task
                .files
                .iter()
                .find_map(|file| claimed.get(file.as_str()).copied());

            match holder {
                Some(holder) => {
                    let files = graph
                        .get_task(holder)
                        .map(|other| task.shared_files(other))
                        .unwrap_or_default();
                    wlog_debug!(
                        "Demoting {} from level {}: shares {:?} with {}",
                        id,
                        level,
                        files,
                        holder
                    );
                    demotions.push(Demotion {
                        task_id: id.clone(),
                        from_level: level,
                        conflicts_with: holder.clone(),
                        files,
                    });
                }
                None => {
                    for file in &task.files {
                        claimed.insert(file.as_str(), id);
                    }
                    accepted.push(id);
                }
            }
        }

        if accepted.is_empty() {
            return Err(Error::CycleDetected {
                task_ids: unplaced.into_iter().cloned().collect(),
            });
        }

        let accepted_set: HashSet<&TaskId> = accepted.iter().copied().collect();
        unplaced.retain(|id| !accepted_set.contains(id));
        for &id in &accepted {
            placed.insert(id, level);
        }

        accepted.sort_by_key(|id| {
            let priority = graph.get_task(id).map(|t| t.priority).unwrap_or(0);
            let position = graph.input_position(id).unwrap_or(usize::MAX);
            (std::cmp::Reverse(priority), position)
        });

        groups.push(ExecutionGroup {
            index: level,
            task_ids: accepted.into_iter().cloned().collect(),
        });
    }

    wlog_debug!(
        "Planned {} tasks into {} groups ({} demotions)",
        graph.task_count(),
        groups.len(),
        demotions.len()
    );

    Ok(ExecutionPlan {
        groups,
        inferred_edges: graph.inferred_edges().to_vec(),
        demotions,
    })
}
