//! Dependency graph built from a flat task list.
//!
//! Edges point from a dependency to its dependent: `a -> b` means `a` must be
//! done before `b` starts. Edges come from declared `depends_on` entries and,
//! optionally, from static analysis of the `files`/`reads` sets. Building the
//! graph is a pure function of the task list and fails on any cycle.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::{wlog_debug, wlog_trace};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Why one task must run before another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DependencyType {
    /// Listed in the dependent's `depends_on`.
    Declared,
    /// The dependent reads files only the dependency writes.
    FileDependency {
        /// Files produced by the dependency and read by the dependent.
        files: Vec<String>,
    },
    /// Keyword heuristic: the dependent's description mentions the dependency.
    SemanticDependency {
        /// Reason for the semantic dependency.
        reason: String,
    },
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Declared => write!(f, "declared"),
            DependencyType::FileDependency { files } => {
                write!(f, "reads {}", files.join(", "))
            }
            DependencyType::SemanticDependency { reason } => {
                write!(f, "semantic: {}", reason)
            }
        }
    }
}

/// An edge added by inference rather than declaration, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredEdge {
    pub from: TaskId,
    pub to: TaskId,
    pub dependency: DependencyType,
}

/// Controls which inferred edges are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    /// Add producer -> consumer edges from `files`/`reads` overlap.
    pub infer_file_dependencies: bool,
    /// Add edges when a description mentions another task id. Last resort.
    pub keyword_inference: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            infer_file_dependencies: true,
            keyword_inference: false,
        }
    }
}

/// The task dependency graph.
///
/// Node indices follow input order, which the planner uses for
/// deterministic tie-breaking.
pub struct DependencyGraph {
    graph: DiGraph<Task, DependencyType>,
    task_index: HashMap<TaskId, NodeIndex>,
    inferred: Vec<InferredEdge>,
}

impl DependencyGraph {
    /// Build and validate the graph.
    ///
    /// # Errors
    /// - `DuplicateTask` if two tasks share an id
    /// - `UnknownDependency` if `depends_on` names a task not in the list
    /// - `CycleDetected` naming every task on the first cycle found
    pub fn build(tasks: Vec<Task>, options: GraphOptions) -> Result<Self> {
        let mut dag = Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            inferred: Vec::new(),
        };

        for task in tasks {
            if dag.task_index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id));
            }
            let id = task.id.clone();
            let index = dag.graph.add_node(task);
            dag.task_index.insert(id, index);
        }

        dag.add_declared_edges()?;
        if options.infer_file_dependencies {
            dag.infer_file_edges();
        }
        if options.keyword_inference {
            dag.infer_keyword_edges();
        }

        if let Some(cycle) = dag.detect_cycle() {
            return Err(Error::CycleDetected { task_ids: cycle });
        }

        wlog_debug!(
            "DependencyGraph built: {} tasks, {} edges ({} inferred)",
            dag.task_count(),
            dag.dependency_count(),
            dag.inferred.len()
        );
        Ok(dag)
    }

    fn add_declared_edges(&mut self) -> Result<()> {
        let mut edges = Vec::new();
        for to in self.graph.node_indices() {
            let task = &self.graph[to];
            for dep in &task.depends_on {
                let from = self.task_index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                })?;
                edges.push((*from, to));
            }
        }
        for (from, to) in edges {
            self.graph.add_edge(from, to, DependencyType::Declared);
        }
        Ok(())
    }

    fn infer_file_edges(&mut self) {
        let mut writers: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        for index in self.graph.node_indices() {
            for file in &self.graph[index].files {
                writers.entry(file.as_str()).or_default().push(index);
            }
        }

        // (producer, consumer) -> files, ordered for determinism.
        let mut pairs: BTreeMap<(NodeIndex, NodeIndex), Vec<String>> = BTreeMap::new();
        for consumer in self.graph.node_indices() {
            for file in &self.graph[consumer].reads {
                let producers: Vec<NodeIndex> = writers
                    .get(file.as_str())
                    .map(|w| w.iter().copied().filter(|&p| p != consumer).collect())
                    .unwrap_or_default();
                // Only a single producer makes the ordering unambiguous.
                if let [producer] = producers.as_slice() {
                    pairs
                        .entry((*producer, consumer))
                        .or_default()
                        .push(file.clone());
                }
            }
        }

        for ((from, to), files) in pairs {
            self.add_inferred(from, to, DependencyType::FileDependency { files });
        }
    }

    fn infer_keyword_edges(&mut self) {
        let mut candidates = Vec::new();
        for from in self.graph.node_indices() {
            let id = self.graph[from].id.as_str();
            let pattern = match Regex::new(&format!(r"\b{}\b", regex::escape(id))) {
                Ok(re) => re,
                Err(_) => continue,
            };
            for to in self.graph.node_indices() {
                if from != to && pattern.is_match(&self.graph[to].description) {
                    candidates.push((from, to, format!("description mentions {}", id)));
                }
            }
        }
        for (from, to, reason) in candidates {
            self.add_inferred(from, to, DependencyType::SemanticDependency { reason });
        }
    }

    /// Add an inferred edge unless the pair is already related or the edge
    /// would close a cycle.
    fn add_inferred(&mut self, from: NodeIndex, to: NodeIndex, dependency: DependencyType) {
        if self.graph.find_edge(from, to).is_some() || self.graph.find_edge(to, from).is_some() {
            return;
        }
        if has_path_connecting(&self.graph, to, from, None) {
            wlog_trace!(
                "Skipping inferred edge {} -> {}: would close a cycle",
                self.graph[from].id,
                self.graph[to].id
            );
            return;
        }
        self.inferred.push(InferredEdge {
            from: self.graph[from].id.clone(),
            to: self.graph[to].id.clone(),
            dependency: dependency.clone(),
        });
        self.graph.add_edge(from, to, dependency);
    }

    /// Iterative DFS. `path` holds the nodes currently on the stack and
    /// `on_path` maps each of them to its depth, so a back edge yields the
    /// cycle in traversal order. A self-dependency is a cycle of one.
    fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited = HashSet::new();
        let mut on_path: HashMap<NodeIndex, usize> = HashMap::new();

        for root in self.graph.node_indices() {
            if !visited.insert(root) {
                continue;
            }
            let mut path = vec![root];
            let mut frames = vec![self.sorted_neighbors(root, Direction::Outgoing).into_iter()];
            on_path.insert(root, 0);

            while let Some(neighbors) = frames.last_mut() {
                match neighbors.next() {
                    Some(next) => {
                        if let Some(&depth) = on_path.get(&next) {
                            return Some(
                                path[depth..]
                                    .iter()
                                    .map(|&i| self.graph[i].id.clone())
                                    .collect(),
                            );
                        }
                        if visited.insert(next) {
                            on_path.insert(next, path.len());
                            path.push(next);
                            frames.push(self.sorted_neighbors(next, Direction::Outgoing).into_iter());
                        }
                    }
                    None => {
                        frames.pop();
                        if let Some(done) = path.pop() {
                            on_path.remove(&done);
                        }
                    }
                }
            }
        }
        None
    }

    fn sorted_neighbors(&self, node: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(node, direction).collect();
        neighbors.sort();
        neighbors.dedup();
        neighbors
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Position of the task in the input list.
    pub fn input_position(&self, id: &TaskId) -> Option<usize> {
        self.task_index.get(id).map(|index| index.index())
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Check if `from` must run before `to` through a direct edge.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        match (self.task_index.get(from), self.task_index.get(to)) {
            (Some(&f), Some(&t)) => self.graph.find_edge(f, t).is_some(),
            _ => false,
        }
    }

    /// Get the dependency type between two tasks, if one exists.
    pub fn get_dependency(&self, from: &TaskId, to: &TaskId) -> Option<&DependencyType> {
        let from_idx = self.task_index.get(from)?;
        let to_idx = self.task_index.get(to)?;
        let edge = self.graph.find_edge(*from_idx, *to_idx)?;
        self.graph.edge_weight(edge)
    }

    /// Tasks that must be done before `id` (declared and inferred), in input order.
    pub fn dependencies(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbor_ids(id, Direction::Incoming)
    }

    /// Tasks that directly depend on `id`, in input order.
    pub fn dependents(&self, id: &TaskId) -> Vec<&TaskId> {
        self.neighbor_ids(id, Direction::Outgoing)
    }

    fn neighbor_ids(&self, id: &TaskId, direction: Direction) -> Vec<&TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .sorted_neighbors(index, direction)
                .into_iter()
                .map(|n| &self.graph[n].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every task reachable from `roots` along dependency edges, excluding
    /// the roots themselves, in input order.
    pub fn transitive_dependents(&self, roots: &[TaskId]) -> Vec<TaskId> {
        let root_nodes: HashSet<NodeIndex> = roots
            .iter()
            .filter_map(|id| self.task_index.get(id).copied())
            .collect();
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut frontier: Vec<NodeIndex> = root_nodes.iter().copied().collect();

        while let Some(node) = frontier.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if !root_nodes.contains(&next) && seen.insert(next) {
                    frontier.push(next);
                }
            }
        }

        let mut found: Vec<NodeIndex> = seen.into_iter().collect();
        found.sort();
        found.into_iter().map(|n| self.graph[n].id.clone()).collect()
    }

    /// All tasks in input order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_weights()
    }

    /// Edges added by inference, with their rationale.
    pub fn inferred_edges(&self) -> &[InferredEdge] {
        &self.inferred
    }

    /// Tasks in topological order (each after all of its dependencies).
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| Error::CycleDetected {
            task_ids: vec![self.graph[cycle.node_id()].id.clone()],
        })?;
        Ok(sorted.into_iter().map(|index| &self.graph[index]).collect())
    }

    /// Get the underlying graph for advanced operations.
    pub fn graph(&self) -> &DiGraph<Task, DependencyType> {
        &self.graph
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .field("inferred", &self.inferred.len())
            .finish()
    }
}
