//! Failure classification shared by task execution and validation.

use serde::{Deserialize, Serialize};

/// Coarse class of a failure, used to pick a fix strategy and to decide
/// whether a task failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Syntax,
    Type,
    Test,
    Integration,
    Timeout,
    Resource,
    Other,
}

impl FailureClass {
    pub const ALL: [FailureClass; 7] = [
        FailureClass::Syntax,
        FailureClass::Type,
        FailureClass::Test,
        FailureClass::Integration,
        FailureClass::Timeout,
        FailureClass::Resource,
        FailureClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Syntax => "syntax",
            FailureClass::Type => "type",
            FailureClass::Test => "test",
            FailureClass::Integration => "integration",
            FailureClass::Timeout => "timeout",
            FailureClass::Resource => "resource",
            FailureClass::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureClass {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        FailureClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| crate::Error::Validation(format!("unknown failure class '{}'", s)))
    }
}

/// A classified failure reported by an executor.
///
/// Recoverable failures send the task back to `todo`; unrecoverable ones
/// block it and halt forward progress of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub class: FailureClass,
    pub message: String,
    pub recoverable: bool,
}

impl TaskFailure {
    pub fn recoverable(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn unrecoverable(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}
