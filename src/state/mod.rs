//! Task status tracking.
//!
//! The tracker is the single synchronized store of task statuses for a plan
//! run. Sinks mirror committed changes to external destinations.

pub mod sink;
pub mod tracker;

pub use sink::{JsonlSink, ProgressSink};
pub use tracker::{Snapshot, StateTracker, StatusEvent, StatusUpdate};
