//! Versioned task status board.
//!
//! One `RwLock` guards every status. Writes validate the full batch before
//! applying any of it, bump the version once, and append one history event
//! per changed task. Committed batches are forwarded to an optional sink
//! while the lock is still held, so the sink sees them in version order.
//! Sink writes run on the blocking pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::{Task, TaskId, TaskStatus};
use crate::state::sink::ProgressSink;
use crate::{wlog_debug, wlog_warn, Error, Result};

/// External request to move a task to a new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub new_status: TaskStatus,
    #[serde(default)]
    pub note: Option<String>,
}

/// One committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub note: Option<String>,
    /// Board version produced by the commit that contained this event.
    pub version: u64,
    pub at: DateTime<Utc>,
}

/// Consistent view of the board at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub statuses: BTreeMap<TaskId, TaskStatus>,
}

impl Snapshot {
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.statuses.get(id).copied()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.statuses.values().filter(|&&s| s == status).count()
    }
}

#[derive(Debug, Default)]
struct Board {
    statuses: HashMap<TaskId, TaskStatus>,
    order: Vec<TaskId>,
    version: u64,
    history: Vec<StatusEvent>,
}

impl Board {
    fn current(&self, id: &TaskId) -> Result<TaskStatus> {
        self.statuses
            .get(id)
            .copied()
            .ok_or_else(|| Error::TaskNotFound(id.clone()))
    }

    /// Apply already-validated changes as a single version.
    fn commit(
        &mut self,
        changes: Vec<(TaskId, TaskStatus, TaskStatus)>,
        note: Option<&str>,
    ) -> Vec<StatusEvent> {
        self.version += 1;
        let at = Utc::now();
        let events: Vec<StatusEvent> = changes
            .into_iter()
            .map(|(task_id, from, to)| {
                self.statuses.insert(task_id.clone(), to);
                StatusEvent {
                    task_id,
                    from,
                    to,
                    note: note.map(str::to_string),
                    version: self.version,
                    at,
                }
            })
            .collect();
        self.history.extend(events.iter().cloned());
        events
    }
}

/// Shared status store for one plan run.
pub struct StateTracker {
    board: RwLock<Board>,
    sink: Option<Arc<dyn ProgressSink>>,
    sink_degraded: AtomicBool,
}

impl StateTracker {
    /// Seed the board from each task's declared status.
    pub fn new<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut board = Board::default();
        for task in tasks {
            if board.statuses.insert(task.id.clone(), task.status).is_none() {
                board.order.push(task.id.clone());
            }
        }
        Self {
            board: RwLock::new(board),
            sink: None,
            sink_degraded: AtomicBool::new(false),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// True once the sink has failed and been dropped.
    pub fn sink_degraded(&self) -> bool {
        self.sink_degraded.load(Ordering::Relaxed)
    }

    pub async fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.board.read().await.current(id)
    }

    pub async fn version(&self) -> u64 {
        self.board.read().await.version
    }

    pub async fn snapshot(&self) -> Snapshot {
        let board = self.board.read().await;
        Snapshot {
            version: board.version,
            statuses: board
                .statuses
                .iter()
                .map(|(id, status)| (id.clone(), *status))
                .collect(),
        }
    }

    pub async fn history(&self) -> Vec<StatusEvent> {
        self.board.read().await.history.clone()
    }

    /// Tasks currently in `status`, in seed order.
    pub async fn tasks_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        let board = self.board.read().await;
        board
            .order
            .iter()
            .filter(|id| board.statuses.get(*id) == Some(&status))
            .cloned()
            .collect()
    }

    /// Move every task in `ids` to `to`, or none of them.
    ///
    /// An empty batch is a no-op and does not bump the version.
    ///
    /// # Errors
    /// `TaskNotFound` or `IllegalTransition` for the first offending task;
    /// the board is unchanged in that case.
    pub async fn batch_set(&self, ids: &[TaskId], to: TaskStatus, note: Option<&str>) -> Result<u64> {
        let mut board = self.board.write().await;
        let mut seen = HashSet::new();
        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            let from = board.current(id)?;
            if !from.can_transition(to) {
                return Err(Error::IllegalTransition {
                    task_id: id.clone(),
                    from,
                    to,
                });
            }
            changes.push((id.clone(), from, to));
        }
        if changes.is_empty() {
            return Ok(board.version);
        }
        let events = board.commit(changes, note);
        wlog_debug!("batch_set {} tasks -> {} (v{})", events.len(), to, board.version);
        self.publish(&events).await;
        Ok(board.version)
    }

    /// Compare-and-set a single task.
    ///
    /// # Errors
    /// `IllegalTransition` when `from` is not the current status or the edge
    /// `from -> to` is not legal.
    pub async fn transition(
        &self,
        id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        note: Option<&str>,
    ) -> Result<u64> {
        let mut board = self.board.write().await;
        let current = board.current(id)?;
        if current != from || !current.can_transition(to) {
            return Err(Error::IllegalTransition {
                task_id: id.clone(),
                from: current,
                to,
            });
        }
        let events = board.commit(vec![(id.clone(), current, to)], note);
        wlog_debug!("transition {}: {} -> {} (v{})", id, from, to, board.version);
        self.publish(&events).await;
        Ok(board.version)
    }

    /// Apply an external status update from whatever the task is in now.
    pub async fn apply(&self, update: StatusUpdate) -> Result<u64> {
        let mut board = self.board.write().await;
        let current = board.current(&update.task_id)?;
        if !current.can_transition(update.new_status) {
            return Err(Error::IllegalTransition {
                task_id: update.task_id,
                from: current,
                to: update.new_status,
            });
        }
        let events = board.commit(
            vec![(update.task_id, current, update.new_status)],
            update.note.as_deref(),
        );
        self.publish(&events).await;
        Ok(board.version)
    }

    /// Forward one committed batch. Callers hold the board write lock.
    async fn publish(&self, events: &[StatusEvent]) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.sink_degraded() {
            return;
        }

        let name = sink.name().to_string();
        let writer = Arc::clone(sink);
        let batch = events.to_vec();
        let result = tokio::task::spawn_blocking(move || writer.publish(&batch))
            .await
            .unwrap_or_else(|e| Err(Error::ExternalSinkUnavailable(format!("sink writer failed: {}", e))));

        if let Err(e) = result {
            if !self.sink_degraded.swap(true, Ordering::Relaxed) {
                wlog_warn!(
                    "Progress sink '{}' unavailable, continuing with local tracking only: {}",
                    name,
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTracker")
            .field("has_sink", &self.sink.is_some())
            .field("sink_degraded", &self.sink_degraded())
            .finish()
    }
}
