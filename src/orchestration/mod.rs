//! Planning and execution.
//!
//! The planner turns a dependency graph into ordered execution groups; the
//! coordinator dispatches each group to executors resolved by assignee.

pub mod coordinator;
pub mod executor;
pub mod planner;

pub use coordinator::{
    Coordinator, CoordinatorEvent, CoordinatorOptions, GroupReport, RunReport, RunStatus,
    TaskOutcome, DEFAULT_TASK_TIMEOUT,
};
pub use executor::{DryRunExecutor, ExecutionOutput, Executor, ExecutorRegistry, ShellExecutor};
pub use planner::{plan, Demotion, ExecutionGroup, ExecutionPlan};
