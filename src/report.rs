//! Plan summaries and final run reports.
//!
//! Both render as plain text for the terminal and serialize to JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

use crate::core::{DependencyGraph, InferredEdge, TaskFailure, TaskId, TaskStatus};
use crate::orchestration::{Demotion, ExecutionPlan, RunReport, RunStatus};
use crate::validation::{LevelState, ValidationReport};

/// Sequential vs. parallel time from per-task estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub sequential: u64,
    pub parallel: u64,
    /// `(sequential - parallel) / sequential`, 0 when sequential is 0.
    pub speedup: f64,
    /// Longest estimate-weighted dependency chain.
    pub critical_path: Vec<TaskId>,
    pub critical_path_length: u64,
}

impl TimeEstimate {
    pub fn compute(graph: &DependencyGraph, plan: &ExecutionPlan, default_estimate: u64) -> Self {
        let estimate_of = |id: &TaskId| {
            graph
                .get_task(id)
                .map(|t| t.estimate_or(default_estimate))
                .unwrap_or(default_estimate)
        };

        let sequential: u64 = graph.tasks().map(|t| t.estimate_or(default_estimate)).sum();
        let parallel: u64 = plan
            .groups
            .iter()
            .map(|g| g.task_ids.iter().map(estimate_of).max().unwrap_or(0))
            .sum();
        let speedup = if sequential == 0 {
            0.0
        } else {
            (sequential as f64 - parallel as f64) / sequential as f64
        };

        let (critical_path, critical_path_length) = critical_path(graph, default_estimate);

        Self {
            sequential,
            parallel,
            speedup,
            critical_path,
            critical_path_length,
        }
    }

    pub fn speedup_percent(&self) -> f64 {
        self.speedup * 100.0
    }
}

fn critical_path(graph: &DependencyGraph, default_estimate: u64) -> (Vec<TaskId>, u64) {
    let Ok(order) = graph.topological_order() else {
        return (Vec::new(), 0);
    };

    let mut best: HashMap<&TaskId, (u64, Option<&TaskId>)> = HashMap::new();
    for task in &order {
        let (base, prev) = graph
            .dependencies(&task.id)
            .into_iter()
            .filter_map(|dep| best.get(dep).map(|(len, _)| (*len, dep)))
            .fold((0, None), |acc, (len, dep)| {
                if len > acc.0 {
                    (len, Some(dep))
                } else {
                    acc
                }
            });
        best.insert(&task.id, (base + task.estimate_or(default_estimate), prev));
    }

    // Longest end point; ties go to the earliest task in input order.
    let Some((mut cursor, length)) = graph
        .tasks()
        .filter_map(|t| best.get(&t.id).map(|(len, _)| (&t.id, *len)))
        .fold(None, |acc: Option<(&TaskId, u64)>, (id, len)| match acc {
            Some((_, best_len)) if best_len >= len => acc,
            _ => Some((id, len)),
        })
    else {
        return (Vec::new(), 0);
    };

    let mut path = vec![cursor.clone()];
    while let Some((_, Some(prev))) = best.get(cursor) {
        path.push((*prev).clone());
        cursor = *prev;
    }
    path.reverse();
    (path, length)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLine {
    pub id: TaskId,
    pub title: String,
    pub assignee: String,
    pub priority: i32,
    pub estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub index: usize,
    pub tasks: Vec<TaskLine>,
    /// Longest task in the group.
    pub estimate: u64,
}

/// Everything known about a plan before it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_tasks: usize,
    pub groups: Vec<GroupSummary>,
    pub inferred_edges: Vec<InferredEdge>,
    pub demotions: Vec<Demotion>,
    pub estimate: TimeEstimate,
}

impl PlanSummary {
    pub fn build(graph: &DependencyGraph, plan: &ExecutionPlan, default_estimate: u64) -> Self {
        let groups = plan
            .groups
            .iter()
            .map(|group| {
                let tasks: Vec<TaskLine> = group
                    .task_ids
                    .iter()
                    .filter_map(|id| graph.get_task(id))
                    .map(|t| TaskLine {
                        id: t.id.clone(),
                        title: t.title.clone(),
                        assignee: t.assignee.clone(),
                        priority: t.priority,
                        estimate: t.estimate_or(default_estimate),
                    })
                    .collect();
                let estimate = tasks.iter().map(|t| t.estimate).max().unwrap_or(0);
                GroupSummary {
                    index: group.index,
                    tasks,
                    estimate,
                }
            })
            .collect();

        Self {
            total_tasks: graph.task_count(),
            groups,
            inferred_edges: plan.inferred_edges.clone(),
            demotions: plan.demotions.clone(),
            estimate: TimeEstimate::compute(graph, plan, default_estimate),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Execution plan: {} tasks in {} groups",
            self.total_tasks,
            self.groups.len()
        );
        for group in &self.groups {
            let _ = writeln!(out, "\nGroup {} (est. {})", group.index + 1, group.estimate);
            for task in &group.tasks {
                let _ = writeln!(
                    out,
                    "  - {} {} [{}] est. {}{}",
                    task.id,
                    task.title,
                    task.assignee,
                    task.estimate,
                    if task.priority != 0 {
                        format!(" priority {}", task.priority)
                    } else {
                        String::new()
                    }
                );
            }
        }

        if !self.inferred_edges.is_empty() {
            let _ = writeln!(out, "\nInferred dependencies:");
            for edge in &self.inferred_edges {
                let _ = writeln!(out, "  {} -> {} ({})", edge.from, edge.to, edge.dependency);
            }
        }

        if !self.demotions.is_empty() {
            let _ = writeln!(out, "\nSerialized by file conflicts:");
            for d in &self.demotions {
                let _ = writeln!(
                    out,
                    "  {} moved past group {} (shares {} with {})",
                    d.task_id,
                    d.from_level + 1,
                    d.files.join(", "),
                    d.conflicts_with
                );
            }
        }

        let e = &self.estimate;
        let _ = writeln!(
            out,
            "\nSequential: {}  Parallel: {}  Speedup: {:.1}%",
            e.sequential,
            e.parallel,
            e.speedup_percent()
        );
        if !e.critical_path.is_empty() {
            let path: Vec<&str> = e.critical_path.iter().map(TaskId::as_str).collect();
            let _ = writeln!(
                out,
                "Critical path ({}): {}",
                e.critical_path_length,
                path.join(" -> ")
            );
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Task failed unrecoverably.
    Blocked,
    /// Blocked because a dependency failed terminally.
    DependencyBlocked,
    /// Failed recoverably; eligible for retry.
    RetryEligible,
    /// Never dispatched.
    NotRun,
    ValidationExhausted,
    ValidationSkipped,
    SinkUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub subject: String,
    pub detail: String,
}

/// Outcome of `run`: execution, validation, and what is left to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub plan: PlanSummary,
    pub run: RunReport,
    pub validation: ValidationReport,
    pub remaining_issues: Vec<Issue>,
}

impl FinalReport {
    pub fn build(
        plan: PlanSummary,
        run: RunReport,
        validation: ValidationReport,
        sink_degraded: bool,
    ) -> Self {
        let remaining_issues = collect_issues(&plan, &run, &validation, sink_degraded);
        Self {
            plan,
            run,
            validation,
            remaining_issues,
        }
    }

    /// Every task done and every validation level passed.
    pub fn is_success(&self) -> bool {
        self.run.status == RunStatus::Completed && self.validation.all_passed()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let run = &self.run;
        let _ = writeln!(out, "Run {} {}", run.run_id, run.status);

        for group in &run.groups {
            if !group.started {
                let ids: Vec<&str> = group.not_run.iter().map(TaskId::as_str).collect();
                let _ = writeln!(
                    out,
                    "\nGroup {}: not started ({})",
                    group.index + 1,
                    ids.join(", ")
                );
                continue;
            }
            let done = group.outcomes.iter().filter(|o| o.succeeded()).count();
            let _ = writeln!(
                out,
                "\nGroup {}: {}/{} done",
                group.index + 1,
                done,
                group.outcomes.len()
            );
            for outcome in &group.outcomes {
                match &outcome.failure {
                    None => {
                        let _ = writeln!(
                            out,
                            "  ok   {} ({} ms)",
                            outcome.task_id, outcome.duration_ms
                        );
                    }
                    Some(failure) => {
                        let _ = writeln!(
                            out,
                            "  FAIL {} -> {} {} ({} ms)",
                            outcome.task_id, outcome.status, failure, outcome.duration_ms
                        );
                    }
                }
                if let Some(reason) = &outcome.rejected {
                    let _ = writeln!(out, "       status change rejected: {}", reason);
                }
            }
            for id in &group.deferred {
                let _ = writeln!(out, "  wait {} (dependency not done)", id);
            }
        }

        let _ = writeln!(out, "\nFinal statuses:");
        for status in [
            TaskStatus::Done,
            TaskStatus::Todo,
            TaskStatus::Doing,
            TaskStatus::Blocked,
        ] {
            let count = run.final_statuses.count(status);
            if count > 0 {
                let _ = writeln!(out, "  {}: {}", status, count);
            }
        }

        if !self.validation.levels.is_empty() {
            let _ = writeln!(out, "\nValidation:");
            for level in &self.validation.levels {
                let _ = writeln!(
                    out,
                    "  {} {} after {} attempt(s) [{}]",
                    level.level,
                    level.state,
                    level.attempt_count(),
                    level.command
                );
                for attempt in level.attempts.iter().filter(|a| a.error_class.is_some()) {
                    let fix = attempt
                        .fix_applied
                        .as_ref()
                        .map(|f| f.description.as_str())
                        .unwrap_or("no fix");
                    let _ = writeln!(
                        out,
                        "    #{} {}: {}",
                        attempt.attempt_number,
                        attempt.error_class.map(|c| c.as_str()).unwrap_or("-"),
                        fix
                    );
                }
            }
        }

        if self.remaining_issues.is_empty() {
            let _ = writeln!(out, "\nNo remaining issues.");
        } else {
            let _ = writeln!(out, "\nRemaining issues:");
            for issue in &self.remaining_issues {
                let _ = writeln!(out, "  - {}: {}", issue.subject, issue.detail);
            }
        }
        out
    }
}

fn collect_issues(
    plan: &PlanSummary,
    run: &RunReport,
    validation: &ValidationReport,
    sink_degraded: bool,
) -> Vec<Issue> {
    let failures: HashMap<&TaskId, &TaskFailure> = run
        .groups
        .iter()
        .flat_map(|g| g.outcomes.iter())
        .filter_map(|o| o.failure.as_ref().map(|f| (&o.task_id, f)))
        .collect();

    let mut issues = Vec::new();
    let task_ids = plan.groups.iter().flat_map(|g| g.tasks.iter().map(|t| &t.id));
    for id in task_ids {
        let status = run.final_statuses.status(id);
        let issue = match status {
            Some(TaskStatus::Done) | None => continue,
            Some(TaskStatus::Blocked) if run.cascaded.contains(id) => Issue {
                kind: IssueKind::DependencyBlocked,
                subject: id.to_string(),
                detail: "blocked because a dependency failed terminally".to_string(),
            },
            Some(TaskStatus::Blocked) => Issue {
                kind: IssueKind::Blocked,
                subject: id.to_string(),
                detail: failures
                    .get(id)
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "blocked".to_string()),
            },
            Some(_) => match failures.get(id) {
                Some(f) => Issue {
                    kind: IssueKind::RetryEligible,
                    subject: id.to_string(),
                    detail: format!("{}; eligible for retry", f),
                },
                None => Issue {
                    kind: IssueKind::NotRun,
                    subject: id.to_string(),
                    detail: "not run".to_string(),
                },
            },
        };
        issues.push(issue);
    }

    for level in validation.unresolved() {
        let issue = if level.state == LevelState::Exhausted {
            Issue {
                kind: IssueKind::ValidationExhausted,
                subject: format!("validation '{}'", level.level),
                detail: format!(
                    "exhausted after {} attempts (last failure: {})",
                    level.attempt_count(),
                    level
                        .last_error_class()
                        .map(|c| c.as_str())
                        .unwrap_or("unknown")
                ),
            }
        } else {
            Issue {
                kind: IssueKind::ValidationSkipped,
                subject: format!("validation '{}'", level.level),
                detail: format!("{}", level.state),
            }
        };
        issues.push(issue);
    }

    if sink_degraded {
        issues.push(Issue {
            kind: IssueKind::SinkUnavailable,
            subject: "progress sink".to_string(),
            detail: "external tracking unavailable; statuses tracked locally only".to_string(),
        });
    }
    issues
}
