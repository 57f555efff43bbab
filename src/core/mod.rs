//! Core domain models for weave.
//!
//! Tasks, failure classification, and the dependency graph built from a
//! task list.

pub mod dag;
pub mod failure;
pub mod task;

pub use dag::{DependencyGraph, DependencyType, GraphOptions, InferredEdge};
pub use failure::{FailureClass, TaskFailure};
pub use task::{Task, TaskId, TaskList, TaskStatus, DEFAULT_ASSIGNEE};
