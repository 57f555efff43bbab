//! Execution coordinator.
//!
//! Walks the plan one group at a time. Inside a group every dispatchable
//! task runs as its own tokio task, bounded by a semaphore; the group is
//! fully joined before the next one starts. A task that ends `blocked` halts
//! the plan and blocks everything downstream of it.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::core::{DependencyGraph, FailureClass, Task, TaskFailure, TaskId, TaskStatus};
use crate::orchestration::executor::{Executor, ExecutorRegistry};
use crate::orchestration::planner::{ExecutionGroup, ExecutionPlan};
use crate::state::{Snapshot, StateTracker};
use crate::util::with_timeout;
use crate::{wlog, wlog_debug, wlog_warn, Error, Result};

/// Default per-task timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Events emitted while a plan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    GroupStarted {
        index: usize,
        dispatched: Vec<TaskId>,
        deferred: Vec<TaskId>,
    },
    TaskStarted {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
        duration: Duration,
    },
    TaskFailed {
        task_id: TaskId,
        failure: TaskFailure,
    },
    GroupFinished {
        index: usize,
    },
    /// A group ended with blocked tasks; nothing after it runs.
    PlanHalted {
        index: usize,
        blocked: Vec<TaskId>,
    },
    PlanFinished {
        status: RunStatus,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task is done.
    Completed,
    /// All groups ran but some tasks are not done.
    Partial,
    /// A group ended with blocked tasks.
    Halted,
    /// Stopped between groups by the cancellation token.
    Cancelled,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        self == RunStatus::Completed
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Halted => "halted",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of dispatching one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// Status after the outcome was applied.
    pub status: TaskStatus,
    pub duration_ms: u64,
    pub failure: Option<TaskFailure>,
    pub summary: Option<String>,
    /// Set when the tracker refused the status change for this outcome,
    /// e.g. because the task was moved by an external update meanwhile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// What happened to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub index: usize,
    /// False for groups after a halt or cancellation.
    pub started: bool,
    pub outcomes: Vec<TaskOutcome>,
    /// Todo tasks held back because a dependency is not done.
    pub deferred: Vec<TaskId>,
    /// Tasks that were already done, or not in `todo`, when the group started.
    pub skipped: Vec<TaskId>,
    /// Tasks of a group that never started.
    #[serde(default)]
    pub not_run: Vec<TaskId>,
}

impl GroupReport {
    fn not_started(group: &ExecutionGroup) -> Self {
        Self {
            index: group.index,
            started: false,
            outcomes: Vec::new(),
            deferred: Vec::new(),
            skipped: Vec::new(),
            not_run: group.task_ids.clone(),
        }
    }

    pub fn blocked(&self) -> Vec<TaskId> {
        self.outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Blocked)
            .map(|o| o.task_id.clone())
            .collect()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded()).count()
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub groups: Vec<GroupReport>,
    /// Tasks whose own failure halted the plan.
    pub blocking: Vec<TaskId>,
    /// Dependents blocked because a dependency failed terminally.
    pub cascaded: Vec<TaskId>,
    pub final_statuses: Snapshot,
}

/// Execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Max concurrent tasks per group. `None` means the group size.
    pub concurrency_limit: Option<usize>,
    pub task_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency_limit: config.execution.concurrency_limit,
            task_timeout: config.execution.task_timeout(),
        }
    }
}

/// Wall time of one execution and its result.
type Execution = (Duration, std::result::Result<String, TaskFailure>);

/// Drives an [`ExecutionPlan`] to completion.
///
/// # Example
///
/// ```ignore
/// let graph = Arc::new(DependencyGraph::build(tasks, GraphOptions::default())?);
/// let plan = planner::plan(&graph)?;
/// let tracker = Arc::new(StateTracker::new(graph.tasks()));
/// let report = Coordinator::new(graph, plan, registry, tracker).run().await?;
/// ```
pub struct Coordinator {
    graph: Arc<DependencyGraph>,
    plan: ExecutionPlan,
    registry: ExecutorRegistry,
    tracker: Arc<StateTracker>,
    options: CoordinatorOptions,
    event_tx: Option<mpsc::Sender<CoordinatorEvent>>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        graph: Arc<DependencyGraph>,
        plan: ExecutionPlan,
        registry: ExecutorRegistry,
        tracker: Arc<StateTracker>,
    ) -> Self {
        Self {
            graph,
            plan,
            registry,
            tracker,
            options: CoordinatorOptions::default(),
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<CoordinatorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Execute every group in order.
    ///
    /// # Errors
    /// `UnresolvedAssignee` before anything runs if a task's assignee has no
    /// executor. Task failures are reported, never returned.
    pub async fn run(&self) -> Result<RunReport> {
        self.registry.validate(self.graph.tasks())?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let _tag = crate::log::enter_run(run_id);
        wlog!(
            "Run {} started: {} tasks in {} groups",
            run_id,
            self.plan.task_count(),
            self.plan.len()
        );

        let mut groups = Vec::with_capacity(self.plan.len());
        let mut blocking = Vec::new();
        let mut cascaded = Vec::new();
        let mut status = None;

        for group in &self.plan.groups {
            if status.is_some() {
                groups.push(GroupReport::not_started(group));
                continue;
            }
            if self.cancel.is_cancelled() {
                wlog_warn!("Run {} cancelled before group {}", run_id, group.index);
                status = Some(RunStatus::Cancelled);
                groups.push(GroupReport::not_started(group));
                continue;
            }

            let report = self.run_group(group).await?;
            let blocked = report.blocked();
            groups.push(report);

            if !blocked.is_empty() {
                cascaded = self.block_dependents(&blocked).await;
                wlog_warn!(
                    "Group {} blocked on {:?}; {} dependents blocked",
                    group.index,
                    blocked,
                    cascaded.len()
                );
                self.emit(CoordinatorEvent::PlanHalted {
                    index: group.index,
                    blocked: blocked.clone(),
                })
                .await;
                blocking = blocked;
                status = Some(RunStatus::Halted);
            }
        }

        let final_statuses = self.tracker.snapshot().await;
        let status = status.unwrap_or_else(|| {
            if final_statuses.count(TaskStatus::Done) == final_statuses.statuses.len() {
                RunStatus::Completed
            } else {
                RunStatus::Partial
            }
        });

        self.emit(CoordinatorEvent::PlanFinished { status }).await;
        wlog!("Run {} finished: {}", run_id, status);

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
            groups,
            blocking,
            cascaded,
            final_statuses,
        })
    }

    /// Re-run a single `todo` task whose dependencies are all done.
    pub async fn retry_task(&self, id: &TaskId) -> Result<TaskOutcome> {
        let task = self
            .graph
            .get_task(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?
            .clone();
        let executor = self.registry.resolve(&task)?;

        let snapshot = self.tracker.snapshot().await;
        if let Some(dep) = self.unmet_dependency(id, &snapshot) {
            return Err(Error::Validation(format!(
                "cannot retry {}: dependency {} is not done",
                id, dep
            )));
        }

        self.tracker
            .transition(id, TaskStatus::Todo, TaskStatus::Doing, Some("retry"))
            .await?;
        self.emit(CoordinatorEvent::TaskStarted { task_id: id.clone() })
            .await;

        let execution = execute_one(executor, &task, self.options.task_timeout).await;
        Ok(self.settle(task.id, execution).await)
    }

    /// Run one group.
    ///
    /// # Errors
    /// Only `UnresolvedAssignee`, raised before any status in the group
    /// changes. Tracker rejections stay inside the affected task.
    async fn run_group(&self, group: &ExecutionGroup) -> Result<GroupReport> {
        let snapshot = self.tracker.snapshot().await;
        let mut candidates = Vec::new();
        let mut deferred = Vec::new();
        let mut skipped = Vec::new();

        for id in &group.task_ids {
            match snapshot.status(id) {
                Some(TaskStatus::Todo) => match self.unmet_dependency(id, &snapshot) {
                    Some(dep) => {
                        wlog_debug!("Deferring {}: dependency {} not done", id, dep);
                        deferred.push(id.clone());
                    }
                    None => candidates.push(id.clone()),
                },
                _ => skipped.push(id.clone()),
            }
        }

        let mut resolved = Vec::with_capacity(candidates.len());
        for id in &candidates {
            if let Some(task) = self.graph.get_task(id) {
                resolved.push((task.clone(), self.registry.resolve(task)?));
            }
        }

        let note = format!("group {}", group.index);
        let dispatch = self.mark_doing(resolved, &note, &mut skipped).await;

        self.emit(CoordinatorEvent::GroupStarted {
            index: group.index,
            dispatched: dispatch.iter().map(|(task, _)| task.id.clone()).collect(),
            deferred: deferred.clone(),
        })
        .await;

        let limit = self
            .options
            .concurrency_limit
            .unwrap_or(dispatch.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut ids = Vec::with_capacity(dispatch.len());
        let mut handles = Vec::with_capacity(dispatch.len());
        for (task, executor) in dispatch {
            let semaphore = Arc::clone(&semaphore);
            let event_tx = self.event_tx.clone();
            let timeout = self.options.task_timeout;
            ids.push(task.id.clone());

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        Duration::ZERO,
                        Err(TaskFailure::unrecoverable(FailureClass::Resource, "semaphore closed")),
                    );
                };
                if let Some(tx) = &event_tx {
                    let _ = tx
                        .send(CoordinatorEvent::TaskStarted {
                            task_id: task.id.clone(),
                        })
                        .await;
                }
                execute_one(executor, &task, timeout).await
            }));
        }

        // Failures never cancel siblings; every handle is joined and settled.
        let results = join_all(handles).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (id, joined) in ids.into_iter().zip(results) {
            let execution = joined.unwrap_or_else(|e| {
                (
                    Duration::ZERO,
                    Err(TaskFailure::unrecoverable(
                        FailureClass::Other,
                        format!("executor panicked: {}", e),
                    )),
                )
            });
            outcomes.push(self.settle(id, execution).await);
        }

        self.emit(CoordinatorEvent::GroupFinished { index: group.index })
            .await;

        Ok(GroupReport {
            index: group.index,
            started: true,
            outcomes,
            deferred,
            skipped,
            not_run: Vec::new(),
        })
    }

    /// Move the group's tasks to `doing` in one batch. If the batch is
    /// rejected, fall back to per-task transitions; tasks that cannot move
    /// are not dispatched and land in `skipped`.
    async fn mark_doing(
        &self,
        resolved: Vec<(Task, Arc<dyn Executor>)>,
        note: &str,
        skipped: &mut Vec<TaskId>,
    ) -> Vec<(Task, Arc<dyn Executor>)> {
        let ids: Vec<TaskId> = resolved.iter().map(|(task, _)| task.id.clone()).collect();
        match self.tracker.batch_set(&ids, TaskStatus::Doing, Some(note)).await {
            Ok(_) => resolved,
            Err(e) => {
                wlog_warn!("Batch move to doing rejected ({}); moving tasks one by one", e);
                let mut dispatch = Vec::with_capacity(resolved.len());
                for (task, executor) in resolved {
                    match self
                        .tracker
                        .transition(&task.id, TaskStatus::Todo, TaskStatus::Doing, Some(note))
                        .await
                    {
                        Ok(_) => dispatch.push((task, executor)),
                        Err(e) => {
                            wlog_warn!("Not dispatching {}: {}", task.id, e);
                            skipped.push(task.id);
                        }
                    }
                }
                dispatch
            }
        }
    }

    /// Apply one execution result to the tracker.
    ///
    /// Never fails: a rejected transition is logged and recorded on the
    /// outcome, whose status is then whatever the tracker holds.
    async fn settle(&self, id: TaskId, execution: Execution) -> TaskOutcome {
        let (duration, result) = execution;
        let mut outcome = TaskOutcome {
            task_id: id.clone(),
            status: TaskStatus::Doing,
            duration_ms: duration.as_millis() as u64,
            failure: None,
            summary: None,
            rejected: None,
        };

        let applied = match result {
            Ok(summary) => {
                outcome.summary = Some(summary);
                self.tracker
                    .transition(&id, TaskStatus::Doing, TaskStatus::Done, None)
                    .await
                    .map(|_| TaskStatus::Done)
            }
            Err(failure) => {
                let note = failure.to_string();
                let recoverable = failure.recoverable;
                outcome.failure = Some(failure);
                // doing -> blocked is not a legal edge; go through todo.
                match self
                    .tracker
                    .transition(&id, TaskStatus::Doing, TaskStatus::Todo, Some(&note))
                    .await
                {
                    Ok(_) if recoverable => Ok(TaskStatus::Todo),
                    Ok(_) => self
                        .tracker
                        .transition(&id, TaskStatus::Todo, TaskStatus::Blocked, Some(&note))
                        .await
                        .map(|_| TaskStatus::Blocked),
                    Err(e) => Err(e),
                }
            }
        };

        match applied {
            Ok(status) => outcome.status = status,
            Err(e) => {
                wlog_warn!("Status change for {} rejected: {}", id, e);
                outcome.rejected = Some(e.to_string());
                if let Ok(current) = self.tracker.status(&id).await {
                    outcome.status = current;
                }
            }
        }

        match &outcome.failure {
            None => {
                self.emit(CoordinatorEvent::TaskCompleted {
                    task_id: id,
                    duration,
                })
                .await
            }
            Some(failure) => {
                wlog_warn!("Task {} failed ({}): {}", id, outcome.status, failure);
                self.emit(CoordinatorEvent::TaskFailed {
                    task_id: id,
                    failure: failure.clone(),
                })
                .await
            }
        }
        outcome
    }

    /// Block every `todo` task downstream of `blocked`. Returns the tasks
    /// actually blocked; any the tracker refuses are logged and left as is.
    async fn block_dependents(&self, blocked: &[TaskId]) -> Vec<TaskId> {
        let snapshot = self.tracker.snapshot().await;
        let targets: Vec<TaskId> = self
            .graph
            .transitive_dependents(blocked)
            .into_iter()
            .filter(|id| snapshot.status(id) == Some(TaskStatus::Todo))
            .collect();
        let note = "dependency failed terminally";
        if self
            .tracker
            .batch_set(&targets, TaskStatus::Blocked, Some(note))
            .await
            .is_ok()
        {
            return targets;
        }

        let mut cascaded = Vec::with_capacity(targets.len());
        for id in targets {
            match self
                .tracker
                .transition(&id, TaskStatus::Todo, TaskStatus::Blocked, Some(note))
                .await
            {
                Ok(_) => cascaded.push(id),
                Err(e) => wlog_warn!("Could not block dependent {}: {}", id, e),
            }
        }
        cascaded
    }

    fn unmet_dependency<'a>(&'a self, id: &TaskId, snapshot: &Snapshot) -> Option<&'a TaskId> {
        let done: HashSet<&TaskId> = snapshot
            .statuses
            .iter()
            .filter(|(_, s)| **s == TaskStatus::Done)
            .map(|(id, _)| id)
            .collect();
        self.graph
            .dependencies(id)
            .into_iter()
            .find(|dep| !done.contains(dep))
    }

    async fn emit(&self, event: CoordinatorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Run one task under `timeout`, measuring wall time.
async fn execute_one(executor: Arc<dyn Executor>, task: &Task, timeout: Duration) -> Execution {
    let started = Instant::now();
    let result = match with_timeout(timeout, executor.execute(task)).await {
        Ok(Ok(output)) => Ok(output.summary),
        Ok(Err(failure)) => Err(failure),
        Err(_) => Err(TaskFailure::recoverable(
            FailureClass::Timeout,
            format!("timed out after {:?}", timeout),
        )),
    };
    (started.elapsed(), result)
}
