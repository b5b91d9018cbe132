//! Run command

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Args;
use console::style;
use tracing::info;

use gantry_core::config::{OutputStyle, Parallelism};
use gantry_tasks::executor::signals::cancel_on_signals;
use gantry_tasks::hasher::read_tsconfig_paths;
use gantry_tasks::{
    DirectoryRemoteCache, HasherOptions, RunContext, RunOptions, RunSummary, TaskEvent,
    TaskGraph, TaskOrchestrator, TaskReporter, TaskReporterRegistry, TaskStatus, TaskTarget,
};

use crate::cli::output::{self, plural, status_marker};
use crate::cli::{Cli, OutputFormat, Workspace};
use crate::exit_codes;

/// Run targets across the workspace
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Targets to run: a target name (e.g. `build`) or `project:target[:configuration]`
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Only run in these projects (comma separated or repeated)
    #[arg(short, long, value_delimiter = ',')]
    pub projects: Vec<String>,

    /// Configuration applied to the requested targets
    #[arg(short = 'c', long)]
    pub configuration: Option<String>,

    /// Maximum concurrent tasks, or `false` to run serially
    #[arg(long)]
    pub parallel: Option<Parallelism>,

    /// Stop starting tasks after the first failure
    #[arg(long)]
    pub bail: bool,

    /// Neither read from nor write to the cache
    #[arg(long)]
    pub skip_cache: bool,

    /// How task output is printed
    #[arg(long)]
    pub output_style: Option<OutputStyle>,

    /// Break task dependency cycles instead of failing
    #[arg(long)]
    pub ignore_cycles: bool,

    /// Group tasks of batch-capable executors
    #[arg(long)]
    pub batch: bool,

    /// Cache directory, relative to the workspace root
    #[arg(long)]
    pub cache_directory: Option<PathBuf>,

    /// Show the execution plan without running
    #[arg(long)]
    pub dry_run: bool,

    /// Extra arguments passed to the requested targets
    #[arg(last = true)]
    pub overrides: Vec<String>,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    /// Run options from configuration, with flags taking precedence
    fn options(&self, workspace: &Workspace) -> RunOptions {
        let mut tasks = workspace.config.tasks.clone();
        if let Some(parallel) = self.parallel {
            tasks.parallel = parallel;
        }
        if let Some(style) = self.output_style {
            tasks.output_style = style;
        }
        if let Some(dir) = &self.cache_directory {
            tasks.cache_directory = dir.clone();
        }
        tasks.bail |= self.bail;
        tasks.skip_cache |= self.skip_cache;
        tasks.ignore_cycles |= self.ignore_cycles;
        tasks.batch |= self.batch;

        let mut options = RunOptions::from_config(&tasks);
        options.cache_directory = workspace.resolve(&tasks.cache_directory);
        options.dry_run = self.dry_run;
        options
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        let cwd = std::env::current_dir()?;
        let workspace = Workspace::load_from(&cwd)?;
        let options = self.options(&workspace);

        let task_graph = TaskGraph::build(
            &workspace.project_graph,
            &self.targets,
            &self.projects,
            self.configuration.as_deref(),
            &self.overrides,
        )?;

        if task_graph.is_empty() {
            if cli.prints_text() {
                output::success("No tasks to run.");
            }
            return Ok(exit_codes::SUCCESS);
        }

        let requested = requested_task_ids(&task_graph, &self.targets, &self.projects);
        info!(
            targets = ?self.targets,
            requested = requested.len(),
            tasks = task_graph.len(),
            "running targets"
        );

        if cli.prints_text() {
            let projects = task_graph
                .tasks
                .values()
                .map(|t| t.target.project.as_str())
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            println!();
            output::info(&format!(
                "{} task{} across {} project{}",
                task_graph.len(),
                plural(task_graph.len()),
                projects,
                plural(projects),
            ));
            if cli.verbose || self.dry_run {
                println!();
                println!("{}", task_graph.execution_plan());
            }
            if self.dry_run {
                println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
                return Ok(exit_codes::SUCCESS);
            }
            println!();
        }

        if self.dry_run && cli.format == OutputFormat::Json {
            let plan: Vec<serde_json::Value> = task_graph
                .waves()
                .iter()
                .enumerate()
                .map(|(i, wave)| serde_json::json!({ "wave": i, "tasks": wave }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(exit_codes::SUCCESS);
        }

        let mut reporters = TaskReporterRegistry::new();
        if cli.prints_text() {
            reporters.register(ConsoleReporter::new(options.output_style, cli.verbose));
        }

        let hasher_options = HasherOptions {
            global_inputs: workspace.config.global_inputs.clone(),
            tsconfig_paths: read_tsconfig_paths(&workspace.root),
        };

        let mut orchestrator = TaskOrchestrator::new(options)
            .with_reporter(Arc::new(reporters))
            .with_hasher_options(hasher_options)
            .with_cancellation(cancel_on_signals());
        if let Some(remote) = &workspace.config.remote_cache {
            let remote = DirectoryRemoteCache::new(workspace.resolve(&remote.directory))
                .read_only(remote.read_only);
            orchestrator = orchestrator.with_remote_cache(Arc::new(remote));
        }

        let context = RunContext {
            initiating_project: workspace.project_for_dir(&cwd),
            workspace_root: workspace.root.clone(),
            project_graph: Arc::new(workspace.project_graph),
            task_graph,
            env: std::env::vars().collect(),
        };
        let summary = orchestrator.run(&requested, context).await?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
        } else if !cli.quiet {
            print_failures(&summary);
        }

        Ok(summary.exit_code())
    }
}

/// Ids of the tasks named on the command line, as opposed to their dependencies
fn requested_task_ids(graph: &TaskGraph, targets: &[String], projects: &[String]) -> Vec<String> {
    graph
        .tasks
        .values()
        .filter(|task| {
            targets.iter().any(|requested| match TaskTarget::parse(requested) {
                Some(target) if requested.contains(':') => {
                    target.project == task.target.project && target.target == task.target.target
                }
                _ => {
                    task.target.target == *requested
                        && (projects.is_empty() || projects.contains(&task.target.project))
                }
            })
        })
        .map(|task| task.id.clone())
        .collect()
}

fn summary_json(summary: &RunSummary) -> serde_json::Value {
    serde_json::json!({
        "total": summary.results.len(),
        "succeeded": summary.succeeded(),
        "failed": summary.failed(),
        "cached": summary.cached(),
        "skipped": summary.skipped(),
        "cancelled": summary.cancelled,
        "exit_code": summary.exit_code(),
        "duration_ms": summary.duration.as_millis() as u64,
        "requested": summary.requested,
        "tasks": summary.results.values().map(|r| {
            serde_json::json!({
                "id": r.task.id,
                "status": r.status,
                "code": r.code,
                "hash": r.task.hash,
                "duration_ms": r.duration().as_millis() as u64,
                "error": r.error,
            })
        }).collect::<Vec<_>>(),
    })
}

fn print_failures(summary: &RunSummary) {
    let failed: Vec<_> = summary
        .results
        .values()
        .filter(|r| r.status == TaskStatus::Failure)
        .collect();
    if failed.is_empty() {
        if summary.cancelled {
            output::warning("Run cancelled");
        }
        return;
    }

    println!();
    println!(
        "  {} {}/{} tasks failed:",
        style("✗").red().bold(),
        failed.len(),
        summary.results.len()
    );
    for r in failed {
        let reason = r.error.as_deref().unwrap_or("failed");
        println!("    {} {}: {}", style("✗").red(), r.task.id, reason);
    }
}

/// Console reporter honouring the output style
struct ConsoleReporter {
    style: OutputStyle,
    verbose: bool,
    // keeps lines of concurrent tasks from interleaving mid-line
    lock: Mutex<()>,
}

impl ConsoleReporter {
    fn new(style: OutputStyle, verbose: bool) -> Self {
        Self {
            style,
            verbose,
            lock: Mutex::new(()),
        }
    }

    /// Lines printed for an event
    fn render(&self, event: &TaskEvent) -> Vec<String> {
        match event {
            TaskEvent::RunStarted { .. } => Vec::new(),
            TaskEvent::Started { id, command } => {
                let command = if self.verbose {
                    style(format!("({})", command)).dim().to_string()
                } else {
                    String::new()
                };
                vec![format!("  {} {} {}", style("▸").dim(), style(id).bold(), command)]
            }
            TaskEvent::BatchStarted { executor, tasks } => vec![format!(
                "  {} {} batch of {} task{}",
                style("▸").dim(),
                style(executor).bold(),
                tasks.len(),
                plural(tasks.len())
            )],
            TaskEvent::Output { id, line, is_stderr } => match self.style {
                OutputStyle::Stream => {
                    let prefix = format!("[{}]", id);
                    let prefix = if *is_stderr {
                        style(prefix).red().dim()
                    } else {
                        style(prefix).dim()
                    };
                    vec![format!("    {} {}", prefix, line)]
                }
                OutputStyle::StreamWithoutPrefixes => vec![line.clone()],
                OutputStyle::Static | OutputStyle::Compact => Vec::new(),
            },
            TaskEvent::Completed {
                id,
                status,
                duration,
                terminal_output,
            } => {
                let mut lines = Vec::new();
                // live output was not shown for these, so replay it
                let replay = match self.style {
                    OutputStyle::Stream | OutputStyle::StreamWithoutPrefixes => status.is_cache_hit(),
                    OutputStyle::Static => true,
                    OutputStyle::Compact => *status == TaskStatus::Failure,
                };
                if replay {
                    lines.extend(terminal_output.lines().map(|l| format!("    {}", l)));
                }

                let (marker, marker_style) = status_marker(*status);
                let note = if status.is_cache_hit() {
                    format!(" {}", style(format!("({})", status)).cyan())
                } else {
                    String::new()
                };
                lines.push(format!(
                    "  {} {}{} {}",
                    marker_style.apply_to(marker),
                    marker_style.apply_to(id),
                    note,
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                ));
                lines
            }
            TaskEvent::Skipped { id, reason } => vec![format!(
                "  {} {} {}",
                style("○").yellow(),
                style(id).yellow(),
                style(format!("({})", reason)).dim()
            )],
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => vec![
                String::new(),
                format!(
                    "  {} {}/{} succeeded, {} failed, {} cached, {} not run ({:.1}s)",
                    if *failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    cached,
                    skipped,
                    duration.as_secs_f64()
                ),
            ],
        }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        let lines = self.render(event);
        if lines.is_empty() {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        for line in lines {
            println!("{}", line);
        }
    }
}
