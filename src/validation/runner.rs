//! Bounded retry loop for validation levels.
//!
//! Each level walks `pending -> running -> {passed, failed}`. A failed
//! attempt below the bound is classified, handed to the fix strategy for its
//! class, and retried. A level still failing at the bound ends `exhausted`,
//! which is reported and never aborts the suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, LevelConfig};
use crate::core::FailureClass;
use crate::util::{run_shell, tail, with_timeout};
use crate::validation::classify::ErrorClassifier;
use crate::validation::fix::{FixRecord, FixRegistry};
use crate::{wlog, wlog_debug, wlog_error, wlog_warn, Error, Result};

/// Default attempt bound per level.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const EXCERPT_CHARS: usize = 2000;

/// A named check subject to the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLevel {
    pub name: String,
    pub command: String,
    pub max_attempts: u32,
}

impl ValidationLevel {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn from_config(level: &LevelConfig, default_max: u32) -> Self {
        Self {
            name: level.name.clone(),
            command: level.command.clone(),
            max_attempts: level.max_attempts.unwrap_or(default_max),
        }
    }

    /// All configured levels, in file order.
    pub fn all_from(config: &Config) -> Vec<Self> {
        config
            .validation
            .levels
            .iter()
            .map(|l| Self::from_config(l, config.validation.max_attempts))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelState {
    Pending,
    Running,
    Passed,
    Failed,
    Exhausted,
}

impl LevelState {
    /// Pending -> Running -> Passed | Failed; Failed -> Running on the next
    /// attempt or Exhausted once the bound is reached.
    pub fn can_transition(self, to: LevelState) -> bool {
        matches!(
            (self, to),
            (LevelState::Pending, LevelState::Running)
                | (LevelState::Running, LevelState::Passed)
                | (LevelState::Running, LevelState::Failed)
                | (LevelState::Failed, LevelState::Running)
                | (LevelState::Failed, LevelState::Exhausted)
        )
    }
}

impl std::fmt::Display for LevelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LevelState::Pending => "pending",
            LevelState::Running => "running",
            LevelState::Passed => "passed",
            LevelState::Failed => "failed",
            LevelState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pass,
    Fail,
}

/// One run of a level's command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub level: String,
    /// 1-based.
    pub attempt_number: u32,
    pub command: String,
    pub outcome: AttemptOutcome,
    pub error_class: Option<FailureClass>,
    pub fix_applied: Option<FixRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Tail of the captured output.
    pub output_excerpt: String,
}

/// Final state and attempt history for one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelReport {
    pub level: String,
    pub command: String,
    pub max_attempts: u32,
    pub state: LevelState,
    pub attempts: Vec<ValidationAttempt>,
}

impl LevelReport {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn passed(&self) -> bool {
        self.state == LevelState::Passed
    }

    /// Class of the last failed attempt, if any.
    pub fn last_error_class(&self) -> Option<FailureClass> {
        self.attempts.iter().rev().find_map(|a| a.error_class)
    }
}

/// Reports for every level of a suite run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub levels: Vec<LevelReport>,
}

impl ValidationReport {
    pub fn all_passed(&self) -> bool {
        self.levels.iter().all(LevelReport::passed)
    }

    /// Levels that did not pass (exhausted or never run).
    pub fn unresolved(&self) -> Vec<&LevelReport> {
        self.levels.iter().filter(|l| !l.passed()).collect()
    }
}

/// Result of one validator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    pub passed: bool,
    pub output: String,
}

/// Runs a level's check once.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn run(&self, level: &ValidationLevel) -> Result<CheckOutput>;
}

/// Runs the level's command through `sh -c`; exit 0 passes.
pub struct ShellValidator {
    timeout: Duration,
}

impl ShellValidator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Validator for ShellValidator {
    async fn run(&self, level: &ValidationLevel) -> Result<CheckOutput> {
        let envs = [("WEAVE_LEVEL", level.name.clone())];
        let out = run_shell(&level.command, &envs, self.timeout).await?;
        Ok(CheckOutput {
            passed: out.success,
            output: out.combined(),
        })
    }
}

/// Drives one level through the retry state machine.
pub struct ValidationLoop {
    validator: Arc<dyn Validator>,
    classifier: ErrorClassifier,
    fixes: FixRegistry,
    attempt_timeout: Duration,
}

impl ValidationLoop {
    pub fn new(validator: Arc<dyn Validator>, attempt_timeout: Duration) -> Self {
        Self {
            validator,
            classifier: ErrorClassifier::default(),
            fixes: FixRegistry::default(),
            attempt_timeout,
        }
    }

    /// Shell validator, built-in classifier and configured fix commands.
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.validation.attempt_timeout();
        Self::new(Arc::new(ShellValidator::new(timeout)), timeout).with_fixes(
            FixRegistry::from_commands(config.validation.fix_commands(), timeout),
        )
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_fixes(mut self, fixes: FixRegistry) -> Self {
        self.fixes = fixes;
        self
    }

    /// Run `level` until it passes or the attempt bound is reached.
    pub async fn run_level(&self, level: &ValidationLevel) -> LevelReport {
        let max_attempts = level.max_attempts.max(1);
        let mut state = LevelState::Pending;
        let mut attempts = Vec::new();

        for attempt_number in 1..=max_attempts {
            state = self.advance(level, state, LevelState::Running);
            let started_at = Utc::now();

            let (passed, output, timed_out) =
                match with_timeout(self.attempt_timeout, self.validator.run(level))
                    .await
                    .and_then(|r| r)
                {
                    Ok(check) => (check.passed, check.output, false),
                    Err(Error::Timeout(d)) => (false, format!("timed out after {:?}", d), true),
                    Err(e) => (false, e.to_string(), false),
                };

            if passed {
                state = self.advance(level, state, LevelState::Passed);
                attempts.push(ValidationAttempt {
                    level: level.name.clone(),
                    attempt_number,
                    command: level.command.clone(),
                    outcome: AttemptOutcome::Pass,
                    error_class: None,
                    fix_applied: None,
                    started_at,
                    finished_at: Utc::now(),
                    output_excerpt: tail(&output, EXCERPT_CHARS),
                });
                break;
            }

            state = self.advance(level, state, LevelState::Failed);
            let class = if timed_out {
                FailureClass::Timeout
            } else {
                self.classifier.classify(&output)
            };

            let fix_applied = if attempt_number < max_attempts {
                Some(self.apply_fix(level, class, &output).await)
            } else {
                None
            };

            attempts.push(ValidationAttempt {
                level: level.name.clone(),
                attempt_number,
                command: level.command.clone(),
                outcome: AttemptOutcome::Fail,
                error_class: Some(class),
                fix_applied,
                started_at,
                finished_at: Utc::now(),
                output_excerpt: tail(&output, EXCERPT_CHARS),
            });
        }

        if state == LevelState::Failed {
            state = self.advance(level, state, LevelState::Exhausted);
            wlog_warn!(
                "Validation level '{}' exhausted after {} attempts",
                level.name,
                attempts.len()
            );
        }

        LevelReport {
            level: level.name.clone(),
            command: level.command.clone(),
            max_attempts,
            state,
            attempts,
        }
    }

    async fn apply_fix(&self, level: &ValidationLevel, class: FailureClass, output: &str) -> FixRecord {
        let strategy = self.fixes.get(class);
        match strategy.apply(&level.name, class, output).await {
            Ok(record) => record,
            Err(e) => {
                wlog_warn!("Fix strategy '{}' failed for '{}': {}", strategy.name(), level.name, e);
                FixRecord {
                    strategy: strategy.name().to_string(),
                    description: format!("fix failed: {}", e),
                    automated: false,
                }
            }
        }
    }

    /// Move `level` from `from` to `to`, staying put on an illegal edge.
    fn advance(&self, level: &ValidationLevel, from: LevelState, to: LevelState) -> LevelState {
        if !from.can_transition(to) {
            wlog_error!("Validation '{}': refusing {} -> {}", level.name, from, to);
            return from;
        }
        wlog_debug!("Validation '{}': {} -> {}", level.name, from, to);
        to
    }
}

/// Runs several levels in order. An exhausted level never stops the suite.
pub struct ValidationSuite {
    runner: ValidationLoop,
    levels: Vec<ValidationLevel>,
}

impl ValidationSuite {
    pub fn new(runner: ValidationLoop, levels: Vec<ValidationLevel>) -> Self {
        Self { runner, levels }
    }

    pub fn levels(&self) -> &[ValidationLevel] {
        &self.levels
    }

    /// Run every level. Levels not started before `cancel` fires are
    /// reported `pending` with no attempts.
    pub async fn run(&self, cancel: &CancellationToken) -> ValidationReport {
        let mut reports = Vec::with_capacity(self.levels.len());
        for level in &self.levels {
            if cancel.is_cancelled() {
                reports.push(LevelReport {
                    level: level.name.clone(),
                    command: level.command.clone(),
                    max_attempts: level.max_attempts.max(1),
                    state: LevelState::Pending,
                    attempts: Vec::new(),
                });
                continue;
            }
            wlog!("Running validation level '{}'", level.name);
            reports.push(self.runner.run_level(level).await);
        }
        ValidationReport { levels: reports }
    }
}
