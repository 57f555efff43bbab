//! Reporting integration tests.
//!
//! Plans and runs are summarized into estimates and final reports; the
//! tests check the numbers, the remaining-issue list and serialization.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use weave::core::{FailureClass, Task, TaskFailure};
use weave::orchestration::DryRunExecutor;
use weave::report::{FinalReport, IssueKind, PlanSummary, TimeEstimate};
use weave::validation::{ValidationLevel, ValidationLoop, ValidationReport, ValidationSuite};

use crate::fixtures::{diamond_tasks, RunHarness, ScriptedExecutor, ScriptedValidator};

/// Test: Diamond time estimate
/// Given five tasks of 15 units in groups of 2, 2 and 1
/// When the estimate is computed
/// Then sequential is 75, parallel 45, speedup 40%
#[test]
fn test_diamond_time_estimate() {
    let harness = RunHarness::new(diamond_tasks());
    let estimate = TimeEstimate::compute(&harness.graph, &harness.plan, 15);

    assert_eq!(estimate.sequential, 75);
    assert_eq!(estimate.parallel, 45);
    assert!((estimate.speedup_percent() - 40.0).abs() < 1e-9);
    assert!(estimate.parallel <= estimate.sequential);

    let text = PlanSummary::build(&harness.graph, &harness.plan, 15).render_text();
    assert!(text.contains("Speedup: 40.0%"));
    assert!(text.contains("Group 3"));
}

/// Test: Missing estimates use the default
/// Given tasks without estimates
/// When estimated with a default of 10
/// Then each task counts as 10
#[test]
fn test_default_estimate_applies() {
    let harness = RunHarness::new(vec![Task::new("a", "A"), Task::new("b", "B").with_estimate(30)]);
    let estimate = TimeEstimate::compute(&harness.graph, &harness.plan, 10);
    assert_eq!(estimate.sequential, 40);
    assert_eq!(estimate.parallel, 30);
}

/// Test: Successful end to end report
/// Given a dry run of the diamond and a passing validation level
/// When the final report is built
/// Then it is a success with no remaining issues
#[tokio::test]
async fn test_final_report_success() {
    let harness = RunHarness::new(diamond_tasks());
    let run = harness
        .coordinator(Arc::new(DryRunExecutor::new(15)))
        .run()
        .await
        .unwrap();
    let validation = ValidationSuite::new(
        ValidationLoop::new(Arc::new(ScriptedValidator::new()), Duration::from_secs(5)),
        vec![ValidationLevel::new("unit-tests", "pytest")],
    )
    .run(&CancellationToken::new())
    .await;

    let summary = PlanSummary::build(&harness.graph, &harness.plan, 15);
    let report = FinalReport::build(summary, run, validation, false);

    assert!(report.is_success());
    assert!(report.remaining_issues.is_empty());
    assert!(report.render_text().contains("No remaining issues."));
}

/// Test: Remaining issues after a halted run and exhausted validation
/// Given T3 fails unrecoverably and integration-tests never passes
/// When the final report is built
/// Then issues list T3 as blocked, T5 as dependency-blocked and the exhausted level
#[tokio::test]
async fn test_final_report_lists_remaining_issues() {
    let harness = RunHarness::new(diamond_tasks());
    let run = harness
        .coordinator(Arc::new(ScriptedExecutor::failing(vec![(
            "T3",
            TaskFailure::unrecoverable(FailureClass::Type, "mismatched types"),
        )])))
        .run()
        .await
        .unwrap();

    let validator = ScriptedValidator::new().script(
        "integration-tests",
        vec![(false, "connection refused"); 3],
    );
    let validation = ValidationSuite::new(
        ValidationLoop::new(Arc::new(validator), Duration::from_secs(5)),
        vec![ValidationLevel::new("integration-tests", "make it").with_max_attempts(3)],
    )
    .run(&CancellationToken::new())
    .await;

    let summary = PlanSummary::build(&harness.graph, &harness.plan, 15);
    let report = FinalReport::build(summary, run, validation, true);

    assert!(!report.is_success());
    let kinds: Vec<(IssueKind, &str)> = report
        .remaining_issues
        .iter()
        .map(|i| (i.kind, i.subject.as_str()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (IssueKind::Blocked, "T3"),
            (IssueKind::DependencyBlocked, "T5"),
            (IssueKind::ValidationExhausted, "validation 'integration-tests'"),
            (IssueKind::SinkUnavailable, "progress sink"),
        ]
    );
    assert!(report.remaining_issues[2].detail.contains("integration"));

    let text = report.render_text();
    assert!(text.contains("halted"));
    assert!(text.contains("Group 3: not started (T5)"));
    assert!(text
        .lines()
        .any(|line| line.contains("FAIL T3") && line.ends_with(" ms)")));
    assert!(text.contains("Remaining issues:"));
}

/// Test: Recoverable failures are retry-eligible
/// Given T2 fails recoverably
/// When the final report is built
/// Then T2 is retry-eligible and its dependents are listed as not run
#[tokio::test]
async fn test_recoverable_failure_issues() {
    let harness = RunHarness::new(diamond_tasks());
    let run = harness
        .coordinator(Arc::new(ScriptedExecutor::failing(vec![(
            "T2",
            TaskFailure::recoverable(FailureClass::Test, "assertion failed"),
        )])))
        .run()
        .await
        .unwrap();

    let summary = PlanSummary::build(&harness.graph, &harness.plan, 15);
    let report = FinalReport::build(summary, run, ValidationReport::default(), false);

    let issues: Vec<(IssueKind, &str)> = report
        .remaining_issues
        .iter()
        .map(|i| (i.kind, i.subject.as_str()))
        .collect();
    assert_eq!(
        issues,
        vec![
            (IssueKind::RetryEligible, "T2"),
            (IssueKind::NotRun, "T4"),
            (IssueKind::NotRun, "T5"),
        ]
    );
}

/// Test: JSON report
/// Given a completed dry run
/// When the report is serialized
/// Then run status, groups and estimates are present
#[tokio::test]
async fn test_final_report_json() {
    let harness = RunHarness::new(diamond_tasks());
    let run = harness
        .coordinator(Arc::new(DryRunExecutor::new(15)))
        .run()
        .await
        .unwrap();
    let summary = PlanSummary::build(&harness.graph, &harness.plan, 15);
    let report = FinalReport::build(summary, run, ValidationReport::default(), false);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["run"]["status"], "completed");
    assert_eq!(json["run"]["groups"].as_array().unwrap().len(), 3);
    assert_eq!(json["plan"]["estimate"]["parallel"], 45);
    assert_eq!(json["run"]["final_statuses"]["statuses"]["T5"], "done");
}
