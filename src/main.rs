use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use weave::config::Config;
use weave::core::{DependencyGraph, TaskList};
use weave::orchestration::{
    plan, Coordinator, CoordinatorEvent, CoordinatorOptions, ExecutionPlan, ExecutorRegistry,
};
use weave::report::{FinalReport, PlanSummary};
use weave::state::{JsonlSink, StateTracker};
use weave::validation::{ValidationLevel, ValidationLoop, ValidationReport, ValidationSuite};
use weave::{wlog, wlog_debug, wlog_error, Error, Result};

/// Exit code for a run that finished with blocked tasks or exhausted validation.
const EXIT_PARTIAL: u8 = 2;

/// Weave - dependency-aware task orchestration
#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WEAVE_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Config file (default: ~/.weave/weave.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (writes to ~/.weave/weave.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build the execution plan for a task list and print it
    Plan {
        /// Task list (.toml or .json)
        tasks: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Plan, execute, validate and report
    Run {
        /// Task list (.toml or .json)
        tasks: PathBuf,

        /// Use the dry-run executor for every assignee and skip validation
        #[arg(long)]
        dry_run: bool,

        /// Max concurrent tasks per group
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Write a default config file (to --config, or ~/.weave/weave.toml)
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run configured validation levels only
    Validate {
        /// Run a single level by name
        #[arg(long)]
        level: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    weave::log::init_with_debug(cli.debug);
    if weave::log::is_debug() {
        wlog!("Weave starting (debug mode enabled)");
    }

    let config_path = cli.config.clone();
    let result = match cli.command {
        Command::Plan { tasks, json } => run_plan(config_path.as_deref(), &tasks, json),
        Command::Run {
            tasks,
            dry_run,
            concurrency,
            json,
        } => run_tasks(config_path.as_deref(), &tasks, dry_run, concurrency, json),
        Command::Validate { level, json } => run_validate(config_path.as_deref(), level, json),
        Command::Init { force } => run_init(config_path, force),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            wlog_error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => {
            Config::ensure_dirs()?;
            Config::load()
        }
    }
}

fn build_plan(config: &Config, tasks: &Path) -> Result<(DependencyGraph, ExecutionPlan)> {
    let list = TaskList::load(tasks)?;
    let graph = DependencyGraph::build(list.tasks, config.planning.graph_options())?;
    let plan = plan(&graph)?;
    Ok((graph, plan))
}

fn print_output<T: serde::Serialize>(value: &T, text: impl FnOnce() -> String, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

fn run_plan(config_path: Option<&Path>, tasks: &Path, json: bool) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let (graph, plan) = build_plan(&config, tasks)?;
    let summary = PlanSummary::build(&graph, &plan, config.execution.default_estimate);
    print_output(&summary, || summary.render_text(), json)?;
    Ok(ExitCode::SUCCESS)
}

fn run_tasks(
    config_path: Option<&Path>,
    tasks: &Path,
    dry_run: bool,
    concurrency: Option<usize>,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let (graph, plan) = build_plan(&config, tasks)?;
    let summary = PlanSummary::build(&graph, &plan, config.execution.default_estimate);

    let registry = if dry_run {
        ExecutorRegistry::dry_run(graph.tasks(), config.execution.default_estimate)
    } else {
        ExecutorRegistry::from_config(&config)
    };
    registry.validate(graph.tasks())?;

    let mut options = CoordinatorOptions::from_config(&config);
    if concurrency.is_some() {
        options.concurrency_limit = concurrency;
    }

    let mut tracker = StateTracker::new(graph.tasks());
    if let Some(path) = config.execution.tracking_path() {
        wlog_debug!("Tracking progress to {}", path.display());
        tracker = tracker.with_sink(Arc::new(JsonlSink::new(path)));
    }
    let tracker = Arc::new(tracker);
    let graph = Arc::new(graph);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        spawn_ctrl_c(cancel.clone());

        let (event_tx, event_rx) = mpsc::channel(256);
        let logger = tokio::spawn(log_events(event_rx));

        let coordinator = Coordinator::new(graph, plan, registry, Arc::clone(&tracker))
            .with_options(options)
            .with_events(event_tx)
            .with_cancellation(cancel.clone());
        let run = coordinator.run().await;
        drop(coordinator);
        let _ = logger.await;
        let run = run?;

        let validation = if dry_run {
            ValidationReport::default()
        } else {
            let suite = ValidationSuite::new(
                ValidationLoop::from_config(&config),
                ValidationLevel::all_from(&config),
            );
            suite.run(&cancel).await
        };

        Ok::<_, Error>(FinalReport::build(
            summary,
            run,
            validation,
            tracker.sink_degraded(),
        ))
    })?;

    print_output(&report, || report.render_text(), json)?;
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    })
}

fn run_init(config_path: Option<PathBuf>, force: bool) -> Result<ExitCode> {
    let path = match config_path {
        Some(path) => path,
        None => Config::config_path()?,
    };
    Config::write_default(&path, force)?;
    wlog!("Wrote default config to {}", path.display());
    println!("Wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn run_validate(config_path: Option<&Path>, level: Option<String>, json: bool) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let levels = match level {
        Some(name) => {
            let level = config
                .level(&name)
                .ok_or_else(|| Error::Validation(format!("no validation level named '{}'", name)))?;
            vec![ValidationLevel::from_config(level, config.validation.max_attempts)]
        }
        None => ValidationLevel::all_from(&config),
    };

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        spawn_ctrl_c(cancel.clone());
        ValidationSuite::new(ValidationLoop::from_config(&config), levels)
            .run(&cancel)
            .await
    });

    print_output(&report, || render_validation(&report), json)?;
    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    })
}

fn render_validation(report: &ValidationReport) -> String {
    if report.levels.is_empty() {
        return "No validation levels configured.\n".to_string();
    }
    report
        .levels
        .iter()
        .map(|l| {
            format!(
                "{}: {} after {} attempt(s)\n",
                l.level,
                l.state,
                l.attempt_count()
            )
        })
        .collect()
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            wlog!("Interrupt received, stopping after the current group");
            eprintln!("Interrupted: finishing the current group before stopping");
            cancel.cancel();
        }
    });
}

async fn log_events(mut rx: mpsc::Receiver<CoordinatorEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            CoordinatorEvent::GroupStarted {
                index,
                dispatched,
                deferred,
            } => {
                wlog!(
                    "Group {} started: {} dispatched, {} deferred",
                    index + 1,
                    dispatched.len(),
                    deferred.len()
                );
            }
            CoordinatorEvent::TaskFailed { task_id, failure } => {
                wlog!("Task {} failed: {}", task_id, failure);
            }
            CoordinatorEvent::PlanHalted { index, blocked } => {
                wlog!("Plan halted at group {}: {:?}", index + 1, blocked);
            }
            other => wlog_debug!("{:?}", other),
        }
    }
}
