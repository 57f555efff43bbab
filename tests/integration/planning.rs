//! Planning integration tests.
//!
//! Task lists go through graph construction and leveling; the resulting
//! plans are checked for ordering, conflict freedom and determinism.

use std::collections::HashSet;

use weave::core::{DependencyGraph, DependencyType, GraphOptions, Task, TaskId, TaskList};
use weave::orchestration::plan;
use weave::Error;

use crate::fixtures::{config_conflict_tasks, cycle_tasks, diamond_tasks, write_temp};

fn group_ids(tasks: Vec<Task>) -> Vec<Vec<String>> {
    let graph = DependencyGraph::build(tasks, GraphOptions::default()).unwrap();
    plan(&graph)
        .unwrap()
        .groups
        .iter()
        .map(|g| g.task_ids.iter().map(|id| id.to_string()).collect())
        .collect()
}

/// Test: Diamond dependency leveling
/// Given T1, T2 independent, T3 -> T1, T4 -> T2, T5 -> {T3, T4}
/// When the plan is built
/// Then groups are [T1, T2], [T3, T4], [T5]
#[test]
fn test_diamond_plan_groups() {
    assert_eq!(
        group_ids(diamond_tasks()),
        vec![
            vec!["T1".to_string(), "T2".to_string()],
            vec!["T3".to_string(), "T4".to_string()],
            vec!["T5".to_string()],
        ]
    );
}

/// Test: Shared file serializes independent tasks
/// Given T1 and T2 with no dependency that both write config.json
/// When the plan is built
/// Then they land in different groups and the demotion is recorded
#[test]
fn test_shared_file_serializes_tasks() {
    let graph = DependencyGraph::build(config_conflict_tasks(), GraphOptions::default()).unwrap();
    let plan = plan(&graph).unwrap();

    let t1 = plan.group_of(&TaskId::from("T1")).unwrap();
    let t2 = plan.group_of(&TaskId::from("T2")).unwrap();
    assert_ne!(t1, t2);
    assert_eq!(plan.demotions.len(), 1);
    assert_eq!(plan.demotions[0].files, vec!["config.json".to_string()]);
    assert_eq!(graph.dependency_count(), 0, "conflicts never become edges");
}

/// Test: Mutual dependency is rejected
/// Given Ta depends on Tb and Tb depends on Ta
/// When the graph is built
/// Then CycleDetected names both tasks and no plan exists
#[test]
fn test_cycle_detected_before_planning() {
    let err = DependencyGraph::build(cycle_tasks(), GraphOptions::default()).unwrap_err();
    match err {
        Error::CycleDetected { task_ids } => {
            let ids: HashSet<String> = task_ids.iter().map(|id| id.to_string()).collect();
            assert_eq!(ids, HashSet::from(["Ta".to_string(), "Tb".to_string()]));
        }
        other => panic!("Expected CycleDetected, got {:?}", other),
    }
}

/// Test: Inferred producer/consumer ordering
/// Given a task reading a file only one other task writes
/// When the plan is built
/// Then the reader runs in a later group and the rationale is kept
#[test]
fn test_read_after_write_is_inferred() {
    let graph = DependencyGraph::build(
        vec![
            Task::new("api", "API").with_reads(["openapi.yaml"]),
            Task::new("schema", "Schema").with_files(["openapi.yaml"]),
        ],
        GraphOptions::default(),
    )
    .unwrap();
    let plan = plan(&graph).unwrap();

    assert_eq!(plan.group_of(&TaskId::from("schema")), Some(0));
    assert_eq!(plan.group_of(&TaskId::from("api")), Some(1));
    assert!(matches!(
        plan.inferred_edges[0].dependency,
        DependencyType::FileDependency { ref files } if files == &vec!["openapi.yaml".to_string()]
    ));
}

/// Test: Plan invariants on a mixed task list
/// Given tasks with declared edges, inferred edges and write conflicts
/// When the plan is built
/// Then every task appears once, after all its dependencies, conflict free
#[test]
fn test_plan_invariants_hold() {
    let tasks = vec![
        Task::new("a", "A").with_files(["x", "y"]),
        Task::new("b", "B").with_files(["y"]).with_priority(9),
        Task::new("c", "C").with_files(["z"]).with_reads(["x"]),
        Task::new("d", "D").with_files(["z"]).depends_on(["b"]),
        Task::new("e", "E").depends_on(["c", "d"]),
        Task::new("f", "F"),
    ];
    let graph = DependencyGraph::build(tasks, GraphOptions::default()).unwrap();
    let plan = plan(&graph).unwrap();

    assert_eq!(plan.task_count(), graph.task_count());
    let mut seen = HashSet::new();
    for group in &plan.groups {
        let mut written = HashSet::new();
        for id in &group.task_ids {
            assert!(seen.insert(id.clone()));
            for dep in graph.dependencies(id) {
                assert!(plan.group_of(dep).unwrap() < group.index);
            }
            for file in &graph.get_task(id).unwrap().files {
                assert!(written.insert(file.clone()), "{} written twice in group", file);
            }
        }
    }
}

/// Test: Deterministic output
/// Given the same task list twice
/// When planned independently
/// Then both plans are identical
#[test]
fn test_plan_is_deterministic() {
    let first = group_ids(diamond_tasks());
    let second = group_ids(diamond_tasks());
    assert_eq!(first, second);
}

/// Test: Task list loading
/// Given a TOML task list with defaults omitted
/// When loaded and planned
/// Then defaults apply and the plan is built
#[test]
fn test_load_toml_task_list() {
    let (_dir, path) = write_temp(
        "tasks.toml",
        r#"
        [[tasks]]
        id = "schema"
        title = "Create schema"
        files = ["db/schema.sql"]

        [[tasks]]
        id = "model"
        title = "Model"
        depends_on = ["schema"]
        priority = 2
        estimate = 30
        "#,
    );

    let list = TaskList::load(&path).unwrap();
    assert_eq!(list.tasks.len(), 2);
    assert_eq!(list.tasks[1].estimate, Some(30));
    assert_eq!(list.tasks[0].assignee, "default");

    let graph = DependencyGraph::build(list.tasks, GraphOptions::default()).unwrap();
    assert_eq!(plan(&graph).unwrap().len(), 2);
}

/// Test: JSON task list with an unknown dependency
/// Given a JSON task list referencing a missing task
/// When the graph is built
/// Then UnknownDependency is returned
#[test]
fn test_load_json_unknown_dependency() {
    let (_dir, path) = write_temp(
        "tasks.json",
        r#"{"tasks": [{"id": "a", "title": "A", "depends_on": ["ghost"]}]}"#,
    );
    let list = TaskList::load(&path).unwrap();
    let err = DependencyGraph::build(list.tasks, GraphOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnknownDependency { .. }));
}
