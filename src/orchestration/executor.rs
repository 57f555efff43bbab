//! Executor capability and the assignee registry.
//!
//! An executor carries out one task and reports success or a classified
//! failure. The registry maps assignee names to executors; every assignee in
//! a plan must resolve before the first group runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::core::{FailureClass, Task, TaskFailure};
use crate::util::{run_shell, tail};
use crate::validation::ErrorClassifier;
use crate::{wlog_debug, Error, Result};

/// Successful execution of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub duration: Duration,
    pub summary: String,
}

/// Runs a single task.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, task: &Task) -> std::result::Result<ExecutionOutput, TaskFailure>;
}

/// Assignee name -> executor.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`ShellExecutor`] per `[executors]` entry.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (assignee, command) in &config.executors {
            registry.register(
                assignee,
                Arc::new(ShellExecutor::new(command.clone(), config.execution.task_timeout())),
            );
        }
        registry
    }

    /// A [`DryRunExecutor`] for every assignee named by `tasks`.
    pub fn dry_run<'a>(tasks: impl IntoIterator<Item = &'a Task>, default_estimate: u64) -> Self {
        let executor: Arc<dyn Executor> = Arc::new(DryRunExecutor::new(default_estimate));
        let mut registry = Self::new();
        for task in tasks {
            registry.register(&task.assignee, Arc::clone(&executor));
        }
        registry
    }

    pub fn register(&mut self, assignee: &str, executor: Arc<dyn Executor>) {
        self.executors.insert(assignee.to_string(), executor);
    }

    pub fn contains(&self, assignee: &str) -> bool {
        self.executors.contains_key(assignee)
    }

    pub fn get(&self, assignee: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(assignee).cloned()
    }

    /// Executor for `task`'s assignee.
    pub fn resolve(&self, task: &Task) -> Result<Arc<dyn Executor>> {
        self.get(&task.assignee).ok_or_else(|| Error::UnresolvedAssignee {
            task_id: task.id.clone(),
            assignee: task.assignee.clone(),
        })
    }

    /// Check every task resolves, failing on the first that does not.
    pub fn validate<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) -> Result<()> {
        for task in tasks {
            self.resolve(task)?;
        }
        Ok(())
    }

    pub fn assignees(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("assignees", &self.assignees())
            .finish()
    }
}

/// Runs a shell command template for each task.
///
/// The task is described to the command through `WEAVE_TASK_ID`,
/// `WEAVE_TASK_TITLE`, `WEAVE_TASK_DESCRIPTION` and `WEAVE_TASK_FILES`
/// (space separated).
pub struct ShellExecutor {
    command: String,
    timeout: Duration,
    classifier: ErrorClassifier,
}

impl ShellExecutor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            classifier: ErrorClassifier::default(),
        }
    }

    fn env_for(task: &Task) -> Vec<(&'static str, String)> {
        vec![
            ("WEAVE_TASK_ID", task.id.to_string()),
            ("WEAVE_TASK_TITLE", task.title.clone()),
            ("WEAVE_TASK_DESCRIPTION", task.description.clone()),
            (
                "WEAVE_TASK_FILES",
                task.files.iter().cloned().collect::<Vec<_>>().join(" "),
            ),
        ]
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, task: &Task) -> std::result::Result<ExecutionOutput, TaskFailure> {
        wlog_debug!("ShellExecutor task={} command={:?}", task.id, self.command);
        let out = match run_shell(&self.command, &Self::env_for(task), self.timeout).await {
            Ok(out) => out,
            Err(Error::Timeout(d)) => {
                return Err(TaskFailure::recoverable(
                    FailureClass::Timeout,
                    format!("timed out after {:?}", d),
                ))
            }
            Err(e) => return Err(TaskFailure::unrecoverable(FailureClass::Resource, e.to_string())),
        };

        if out.success {
            return Ok(ExecutionOutput {
                duration: out.elapsed,
                summary: tail(out.stdout.trim(), 200),
            });
        }

        let message = tail(out.combined().trim(), 500);
        match out.exit_code {
            // Not found / not executable: retrying cannot help.
            Some(126) | Some(127) => Err(TaskFailure::unrecoverable(FailureClass::Resource, message)),
            _ => Err(TaskFailure::recoverable(
                self.classifier.classify(&message),
                message,
            )),
        }
    }
}

/// Succeeds immediately and reports the task's estimate.
pub struct DryRunExecutor {
    default_estimate: u64,
}

impl DryRunExecutor {
    pub fn new(default_estimate: u64) -> Self {
        Self { default_estimate }
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn execute(&self, task: &Task) -> std::result::Result<ExecutionOutput, TaskFailure> {
        let started = Instant::now();
        Ok(ExecutionOutput {
            duration: started.elapsed(),
            summary: format!("dry run (estimate {})", task.estimate_or(self.default_estimate)),
        })
    }
}
