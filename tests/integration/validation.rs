//! Validation integration tests.
//!
//! Levels run through the bounded retry loop against scripted validators
//! and real shell commands.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use weave::config::Config;
use weave::core::FailureClass;
use weave::validation::{
    AttemptOutcome, FixRecord, FixRegistry, FixStrategy, LevelState, ValidationLevel,
    ValidationLoop, ValidationSuite,
};

use crate::fixtures::{write_temp, ScriptedValidator};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fix strategy that records which classes it was asked to handle.
struct RecordingFix {
    seen: Mutex<Vec<(String, FailureClass)>>,
}

impl RecordingFix {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<(String, FailureClass)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixStrategy for RecordingFix {
    fn name(&self) -> &str {
        "recording"
    }

    async fn apply(&self, level: &str, class: FailureClass, _output: &str) -> weave::Result<FixRecord> {
        self.seen.lock().unwrap().push((level.to_string(), class));
        Ok(FixRecord {
            strategy: "recording".to_string(),
            description: format!("fixed {} in {}", class, level),
            automated: true,
        })
    }
}

/// Test: Fix then pass
/// Given unit-tests fails once with an import error
/// When the level runs
/// Then the syntax fix is applied and attempt 2 passes
#[tokio::test]
async fn test_fix_applied_then_level_passes() {
    let validator = Arc::new(
        ScriptedValidator::new().script("unit-tests", vec![(false, "missing import: json")]),
    );
    let fix = RecordingFix::new();
    let mut fixes = FixRegistry::new();
    fixes.register(FailureClass::Syntax, fix.clone());

    let runner = ValidationLoop::new(validator.clone(), ATTEMPT_TIMEOUT).with_fixes(fixes);
    let report = runner
        .run_level(&ValidationLevel::new("unit-tests", "pytest"))
        .await;

    assert_eq!(report.state, LevelState::Passed);
    assert_eq!(report.attempt_count(), 2);
    assert_eq!(report.attempts[0].error_class, Some(FailureClass::Syntax));
    assert_eq!(
        report.attempts[0].fix_applied.as_ref().map(|f| f.strategy.as_str()),
        Some("recording")
    );
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::Pass);
    assert_eq!(fix.seen(), vec![("unit-tests".to_string(), FailureClass::Syntax)]);
    assert_eq!(validator.runs("unit-tests"), 2);
}

/// Test: Exhaustion never aborts the suite
/// Given integration-tests fails on every attempt and a later level passes
/// When the suite runs with the default bound
/// Then integration-tests is exhausted after 5 attempts and the next level still runs
#[tokio::test]
async fn test_exhausted_level_does_not_stop_suite() {
    let failures = vec![(false, "Error: connection refused"); 5];
    let validator = Arc::new(ScriptedValidator::new().script("integration-tests", failures));
    let suite = ValidationSuite::new(
        ValidationLoop::new(validator.clone(), ATTEMPT_TIMEOUT),
        vec![
            ValidationLevel::new("integration-tests", "make it"),
            ValidationLevel::new("lint", "make lint"),
        ],
    );

    let report = suite.run(&CancellationToken::new()).await;

    let integration = &report.levels[0];
    assert_eq!(integration.state, LevelState::Exhausted);
    assert_eq!(integration.attempt_count(), 5);
    assert_eq!(integration.last_error_class(), Some(FailureClass::Integration));
    assert!(integration.attempts[4].fix_applied.is_none());
    assert_eq!(report.levels[1].state, LevelState::Passed);
    assert_eq!(validator.runs("lint"), 1);
    assert!(!report.all_passed());
    assert_eq!(report.unresolved().len(), 1);
}

/// Test: Attempt bound
/// Given levels with bounds 1, 2 and 3 that always fail
/// When each level runs
/// Then recorded attempts equal both the bound and the validator's run count
#[tokio::test]
async fn test_attempts_never_exceed_bound() {
    for bound in 1..=3u32 {
        let name = format!("level-{}", bound);
        let validator = Arc::new(
            ScriptedValidator::new().script(&name, vec![(false, "assertion failed"); 10]),
        );
        let runner = ValidationLoop::new(validator.clone(), ATTEMPT_TIMEOUT);
        let report = runner
            .run_level(&ValidationLevel::new(name.as_str(), "check").with_max_attempts(bound))
            .await;

        assert_eq!(report.attempt_count(), bound as usize);
        assert_eq!(validator.runs(&name), bound);
        assert_eq!(report.state, LevelState::Exhausted);
        let numbers: Vec<u32> = report.attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, (1..=bound).collect::<Vec<_>>());
    }
}

/// Test: Shell levels and command fixes
/// Given a level that passes only once a marker file exists
/// And a command fix for test failures that creates the marker
/// When the level runs
/// Then the fix runs between attempts and the level passes on attempt 2
#[tokio::test]
async fn test_command_fix_repairs_shell_level() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("fixed");
    let check = format!(
        "test -f {} || (echo 'test result: FAILED' && exit 1)",
        marker.display()
    );
    let fixes = FixRegistry::from_commands(
        vec![(FailureClass::Test, format!("touch {}", marker.display()))],
        ATTEMPT_TIMEOUT,
    );
    let runner = ValidationLoop::new(
        Arc::new(weave::validation::ShellValidator::new(ATTEMPT_TIMEOUT)),
        ATTEMPT_TIMEOUT,
    )
    .with_fixes(fixes);

    let report = runner
        .run_level(&ValidationLevel::new("unit-tests", check))
        .await;

    assert_eq!(report.state, LevelState::Passed);
    assert_eq!(report.attempt_count(), 2);
    let fix = report.attempts[0].fix_applied.as_ref().unwrap();
    assert_eq!(fix.strategy, "command");
    assert!(fix.automated);
}

/// Test: Slow validator is classed as a timeout
/// Given a level whose command outlives the attempt timeout
/// When the level runs with one attempt
/// Then it is exhausted with a timeout class
#[tokio::test]
async fn test_slow_level_times_out() {
    let runner = ValidationLoop::new(
        Arc::new(weave::validation::ShellValidator::new(Duration::from_secs(30))),
        Duration::from_millis(100),
    );
    let report = runner
        .run_level(&ValidationLevel::new("slow", "sleep 5").with_max_attempts(1))
        .await;

    assert_eq!(report.state, LevelState::Exhausted);
    assert_eq!(report.last_error_class(), Some(FailureClass::Timeout));
}

/// Test: Levels from config
/// Given a config file with two levels, one with its own bound
/// When the levels are built
/// Then order, commands and bounds follow the file
#[test]
fn test_levels_from_config_file() {
    let (_dir, path) = write_temp(
        "weave.toml",
        r#"
        [validation]
        max_attempts = 4

        [[validation.levels]]
        name = "unit-tests"
        command = "cargo test"

        [[validation.levels]]
        name = "lint"
        command = "cargo clippy"
        max_attempts = 2
        "#,
    );
    let config = Config::load_from(&path).unwrap();
    let levels = ValidationLevel::all_from(&config);

    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0].name, "unit-tests");
    assert_eq!(levels[0].max_attempts, 4);
    assert_eq!(levels[1].command, "cargo clippy");
    assert_eq!(levels[1].max_attempts, 2);
}

/// Test: Cancelled suite
/// Given a token cancelled before the suite starts
/// When the suite runs
/// Then every level is pending with no attempts
#[tokio::test]
async fn test_cancelled_suite_reports_pending() {
    let validator = Arc::new(ScriptedValidator::new());
    let suite = ValidationSuite::new(
        ValidationLoop::new(validator.clone(), ATTEMPT_TIMEOUT),
        vec![ValidationLevel::new("unit-tests", "pytest")],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = suite.run(&cancel).await;
    assert_eq!(report.levels[0].state, LevelState::Pending);
    assert_eq!(report.levels[0].attempt_count(), 0);
    assert_eq!(validator.runs("unit-tests"), 0);
}
