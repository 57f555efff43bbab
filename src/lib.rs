pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod report;
pub mod state;
pub mod util;
pub mod validation;

pub use config::Config;
pub use crate::core::{DependencyGraph, GraphOptions, Task, TaskId, TaskList, TaskStatus};
pub use error::{Error, Result};
pub use orchestration::{Coordinator, ExecutionPlan, ExecutorRegistry, RunStatus};
pub use report::{FinalReport, PlanSummary};
pub use state::StateTracker;
