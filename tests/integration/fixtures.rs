//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted executors and validators
//! - Predefined task sets
//! - A harness wiring graph, plan, tracker and coordinator together

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use weave::core::{DependencyGraph, GraphOptions, Task, TaskFailure};
use weave::orchestration::{
    plan, Coordinator, ExecutionOutput, ExecutionPlan, Executor, ExecutorRegistry,
};
use weave::state::StateTracker;
use weave::validation::{CheckOutput, ValidationLevel, Validator};

/// Executor that fails selected tasks and records the order tasks started in.
pub struct ScriptedExecutor {
    failures: HashMap<String, TaskFailure>,
    delay: Duration,
    started: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self::failing(vec![])
    }

    pub fn failing(failures: Vec<(&str, TaskFailure)>) -> Self {
        Self {
            failures: failures
                .into_iter()
                .map(|(id, failure)| (id.to_string(), failure))
                .collect(),
            delay: Duration::from_millis(5),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, task: &Task) -> Result<ExecutionOutput, TaskFailure> {
        self.started.lock().unwrap().push(task.id.to_string());
        tokio::time::sleep(self.delay).await;
        match self.failures.get(task.id.as_str()) {
            Some(failure) => Err(failure.clone()),
            None => Ok(ExecutionOutput {
                duration: self.delay,
                summary: format!("{} ok", task.id),
            }),
        }
    }
}

/// Validator returning scripted results per level, then passing.
pub struct ScriptedValidator {
    scripts: Mutex<HashMap<String, Vec<CheckOutput>>>,
    runs: Mutex<HashMap<String, u32>>,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Queue results for `level`, consumed in order.
    pub fn script(self, level: &str, results: Vec<(bool, &str)>) -> Self {
        let mut queue: Vec<CheckOutput> = results
            .into_iter()
            .map(|(passed, output)| CheckOutput {
                passed,
                output: output.to_string(),
            })
            .collect();
        queue.reverse();
        self.scripts
            .lock()
            .unwrap()
            .insert(level.to_string(), queue);
        self
    }

    /// Number of times `level` actually ran.
    pub fn runs(&self, level: &str) -> u32 {
        self.runs.lock().unwrap().get(level).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn run(&self, level: &ValidationLevel) -> weave::Result<CheckOutput> {
        *self
            .runs
            .lock()
            .unwrap()
            .entry(level.name.clone())
            .or_insert(0) += 1;
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&level.name)
            .and_then(|queue| queue.pop());
        Ok(next.unwrap_or(CheckOutput {
            passed: true,
            output: String::new(),
        }))
    }
}

/// T1, T2 independent; T3 -> T1; T4 -> T2; T5 -> {T3, T4}; 15 units each.
pub fn diamond_tasks() -> Vec<Task> {
    vec![
        Task::new("T1", "Create schema").with_estimate(15),
        Task::new("T2", "Create config loader").with_estimate(15),
        Task::new("T3", "Repository layer").depends_on(["T1"]).with_estimate(15),
        Task::new("T4", "Settings service").depends_on(["T2"]).with_estimate(15),
        Task::new("T5", "HTTP handlers")
            .depends_on(["T3", "T4"])
            .with_estimate(15),
    ]
}

/// Two logically independent tasks that both write `config.json`.
pub fn config_conflict_tasks() -> Vec<Task> {
    vec![
        Task::new("T1", "Add logging settings").with_files(["config.json"]),
        Task::new("T2", "Add cache settings").with_files(["config.json"]),
    ]
}

/// Ta depends on Tb and Tb depends on Ta.
pub fn cycle_tasks() -> Vec<Task> {
    vec![
        Task::new("Ta", "A").depends_on(["Tb"]),
        Task::new("Tb", "B").depends_on(["Ta"]),
    ]
}

/// Graph, plan and tracker for one task list.
pub struct RunHarness {
    pub graph: Arc<DependencyGraph>,
    pub plan: ExecutionPlan,
    pub tracker: Arc<StateTracker>,
}

impl RunHarness {
    pub fn new(tasks: Vec<Task>) -> Self {
        let graph = Arc::new(
            DependencyGraph::build(tasks, GraphOptions::default()).expect("valid task list"),
        );
        let plan = plan(&graph).expect("plannable graph");
        let tracker = Arc::new(StateTracker::new(graph.tasks()));
        Self {
            graph,
            plan,
            tracker,
        }
    }

    /// Coordinator running every task on `executor` under the default assignee.
    pub fn coordinator(&self, executor: Arc<dyn Executor>) -> Coordinator {
        let mut registry = ExecutorRegistry::new();
        registry.register(weave::core::DEFAULT_ASSIGNEE, executor);
        self.coordinator_with(registry)
    }

    pub fn coordinator_with(&self, registry: ExecutorRegistry) -> Coordinator {
        Coordinator::new(
            Arc::clone(&self.graph),
            self.plan.clone(),
            registry,
            Arc::clone(&self.tracker),
        )
    }
}

/// Write `content` to `name` in a fresh temp dir.
pub fn write_temp(name: &str, content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write fixture file");
    (dir, path)
}
