//! Graph command

use clap::Args;
use console::style;

use gantry_tasks::TaskGraph;

use crate::cli::output::{self, plural};
use crate::cli::{Cli, OutputFormat, Workspace};
use crate::exit_codes;

/// Show the project graph, or the task plan when targets are given
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Targets to plan; without targets the project graph is shown
    pub targets: Vec<String>,

    /// Only plan these projects (comma separated or repeated)
    #[arg(short, long, value_delimiter = ',')]
    pub projects: Vec<String>,

    /// Configuration applied to the requested targets
    #[arg(short = 'c', long)]
    pub configuration: Option<String>,
}

impl GraphCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let workspace = Workspace::load()?;
        if self.targets.is_empty() {
            self.show_projects(cli, &workspace)?;
        } else {
            self.show_tasks(cli, &workspace)?;
        }
        Ok(exit_codes::SUCCESS)
    }

    fn show_projects(&self, cli: &Cli, workspace: &Workspace) -> anyhow::Result<()> {
        let graph = &workspace.project_graph;
        let cycle = graph.find_cycle();

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "nodes": graph.nodes,
                "external_nodes": graph.external_nodes,
                "dependencies": graph.dependencies,
                "cycle": cycle,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        if cli.quiet {
            return Ok(());
        }

        println!(
            "{}",
            output::header(&format!(
                "{} project{}",
                graph.nodes.len(),
                plural(graph.nodes.len())
            ))
        );
        println!();
        for (name, project) in &graph.nodes {
            println!("  {} {}", style(name).bold(), output::path_style().apply_to(&project.root));
            let targets: Vec<&str> = project.targets.keys().map(String::as_str).collect();
            if !targets.is_empty() {
                println!("{}", output::key_value("targets", &targets.join(", ")));
            }
            let deps = graph.project_dependencies(name);
            if !deps.is_empty() {
                println!("{}", output::key_value("depends on", &deps.join(", ")));
            }
            let external = graph.external_dependencies(name);
            if !external.is_empty() {
                println!("{}", output::key_value("packages", &external.join(", ")));
            }
        }

        if let Some(cycle) = cycle {
            println!();
            output::warning(&format!("Dependency cycle: {}", cycle.join(" -> ")));
        }
        Ok(())
    }

    fn show_tasks(&self, cli: &Cli, workspace: &Workspace) -> anyhow::Result<()> {
        let graph = TaskGraph::build(
            &workspace.project_graph,
            &self.targets,
            &self.projects,
            self.configuration.as_deref(),
            &[],
        )?;
        let cycle = graph.find_cycle();

        if cli.format == OutputFormat::Json {
            let waves = if cycle.is_none() { graph.waves() } else { Vec::new() };
            let result = serde_json::json!({
                "tasks": graph.tasks.values().map(|t| {
                    serde_json::json!({
                        "id": t.id,
                        "executor": t.executor,
                        "outputs": t.outputs,
                        "cache": t.cache,
                    })
                }).collect::<Vec<_>>(),
                "dependencies": graph.dependencies,
                "roots": graph.roots,
                "waves": waves,
                "cycle": cycle,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        if cli.quiet {
            return Ok(());
        }

        match cycle {
            Some(cycle) => output::warning(&format!("Task dependency cycle: {}", cycle.join(" -> "))),
            None => println!("{}", graph.execution_plan()),
        }
        Ok(())
    }
}
