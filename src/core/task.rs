//! Task data model.
//!
//! Tasks are the atomic units of work handed to executors. Each task
//! declares the files it writes and reads, the tasks it depends on, and the
//! capability (assignee) that should run it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::{wlog_debug, Result};

/// Stable identifier for a task, taken verbatim from the task list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
///
/// Legal edges are `todo -> doing`, `doing -> done`, `doing -> todo`,
/// `todo -> blocked` and `blocked -> todo`. Nothing else is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started, or reset after a recoverable failure.
    #[default]
    Todo,
    /// Handed to an executor.
    Doing,
    /// Finished successfully.
    Done,
    /// Cannot proceed until re-opened by hand.
    Blocked,
}

impl TaskStatus {
    /// Check whether moving from `self` to `to` is a legal edge.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (TaskStatus::Todo, TaskStatus::Doing)
                | (TaskStatus::Doing, TaskStatus::Done)
                | (TaskStatus::Doing, TaskStatus::Todo)
                | (TaskStatus::Todo, TaskStatus::Blocked)
                | (TaskStatus::Blocked, TaskStatus::Todo)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Blocked)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::Doing => write!(f, "doing"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "doing" => Ok(TaskStatus::Doing),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(crate::Error::Validation(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }
}

fn default_assignee() -> String {
    DEFAULT_ASSIGNEE.to_string()
}

/// Assignee used when a task does not name one.
pub const DEFAULT_ASSIGNEE: &str = "default";

/// A single declared unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique, stable identifier.
    pub id: TaskId,
    /// Short human-readable name.
    pub title: String,
    /// What the task should accomplish.
    #[serde(default)]
    pub description: String,
    /// Resources this task writes. Two tasks sharing an entry never run together.
    #[serde(default)]
    pub files: BTreeSet<String>,
    /// Resources this task reads. Used to infer producer -> consumer edges.
    #[serde(default)]
    pub reads: BTreeSet<String>,
    /// Tasks that must be done before this one starts.
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
    /// Higher sorts earlier within a group.
    #[serde(default)]
    pub priority: i32,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Capability name resolved to an executor at dispatch time.
    #[serde(default = "default_assignee")]
    pub assignee: String,
    /// Duration estimate in abstract units.
    #[serde(default)]
    pub estimate: Option<u64>,
}

impl Task {
    /// Create a new task in `todo` with the default assignee.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            description: String::new(),
            files: BTreeSet::new(),
            reads: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            priority: 0,
            status: TaskStatus::Todo,
            assignee: default_assignee(),
            estimate: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_reads<I, S>(mut self, reads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(reads.into_iter().map(Into::into));
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_assignee(mut self, assignee: &str) -> Self {
        self.assignee = assignee.to_string();
        self
    }

    pub fn with_estimate(mut self, estimate: u64) -> Self {
        self.estimate = Some(estimate);
        self
    }

    /// Files written by both `self` and `other`.
    pub fn shared_files(&self, other: &Task) -> Vec<String> {
        self.files.intersection(&other.files).cloned().collect()
    }

    /// Estimate, falling back to `default` when none was declared.
    pub fn estimate_or(&self, default: u64) -> u64 {
        self.estimate.unwrap_or(default)
    }
}

/// An ordered task list as read from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Load a task list. `.toml` files are parsed as TOML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        wlog_debug!("TaskList::load path={}", path.display());
        let content = std::fs::read_to_string(path)?;
        let list = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            _ => Self::from_json_str(&content)?,
        };
        wlog_debug!("TaskList loaded: {} tasks", list.tasks.len());
        Ok(list)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}
