//! Validation retry loop.
//!
//! Runs named validation levels independently of task execution, classifies
//! failures, applies per-class fix strategies, and retries up to a bound.

pub mod classify;
pub mod fix;
pub mod runner;

pub use classify::ErrorClassifier;
pub use fix::{CommandFix, FixRecord, FixRegistry, FixStrategy, ManualFix};
pub use runner::{
    AttemptOutcome, CheckOutput, LevelReport, LevelState, ShellValidator, ValidationAttempt,
    ValidationLevel, ValidationLoop, ValidationReport, ValidationSuite, Validator,
    DEFAULT_MAX_ATTEMPTS,
};
