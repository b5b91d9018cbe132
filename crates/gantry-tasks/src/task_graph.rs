//! Task graph construction and management

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use gantry_core::graph_utils::{self, DependencyGraph, MutableDependencyGraph};
use gantry_core::project_graph::{DependencyScope, ProjectGraph, ProjectNode, TargetConfiguration};

use crate::task::{Task, TaskTarget};

/// Dependency graph of tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Tasks by id
    pub tasks: BTreeMap<String, Task>,
    /// Task id to the ids it depends on
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Tasks without dependencies
    pub roots: Vec<String>,
}

impl TaskGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a task graph for the requested targets.
    ///
    /// Each entry in `targets` is either a target name run in every selected
    /// project that defines it, or an explicit `project:target[:configuration]`.
    /// An empty `projects` selects every project. Overrides only apply to the
    /// requested tasks, never to the dependencies pulled in by `depends_on`.
    ///
    /// Cycles are kept; callers decide whether to reject or break them.
    #[instrument(skip_all, fields(targets = targets.len(), projects = projects.len()))]
    pub fn build(
        project_graph: &ProjectGraph,
        targets: &[String],
        projects: &[String],
        configuration: Option<&str>,
        overrides: &[String],
    ) -> Result<Self, TaskGraphError> {
        let selected: Vec<&ProjectNode> = if projects.is_empty() {
            project_graph.nodes.values().collect()
        } else {
            projects
                .iter()
                .map(|name| {
                    project_graph
                        .get(name)
                        .ok_or_else(|| TaskGraphError::UnknownProject(name.clone()))
                })
                .collect::<Result<_, _>>()?
        };

        let mut builder = TaskGraphBuilder {
            project_graph,
            graph: TaskGraph::new(),
        };

        for requested in targets {
            if requested.contains(':') {
                let target = TaskTarget::parse(requested)
                    .ok_or_else(|| TaskGraphError::InvalidTarget(requested.clone()))?;
                let project = project_graph
                    .get(&target.project)
                    .ok_or_else(|| TaskGraphError::UnknownProject(target.project.clone()))?;
                let configuration = target.configuration.as_deref().or(configuration);
                builder.add_task(project, &target.target, configuration, overrides)?;
                continue;
            }

            let mut found = false;
            for project in &selected {
                if project.targets.contains_key(requested) {
                    builder.add_task(project, requested, configuration, overrides)?;
                    found = true;
                }
            }
            if !found {
                return Err(TaskGraphError::NoProjectsWithTarget(requested.clone()));
            }
        }

        let mut graph = builder.graph;
        graph.refresh_roots();

        info!(
            task_count = graph.tasks.len(),
            root_count = graph.roots.len(),
            "task graph built"
        );
        Ok(graph)
    }

    /// Add a task without edges. An existing task with the same id is kept.
    pub fn add_task(&mut self, task: Task) {
        self.dependencies.entry(task.id.clone()).or_default();
        self.tasks.entry(task.id.clone()).or_insert(task);
    }

    /// Add an edge meaning `task` depends on `dependency`
    pub fn add_dependency(&mut self, task: &str, dependency: &str) {
        let deps = self.dependencies.entry(task.to_string()).or_default();
        if !deps.iter().any(|d| d == dependency) {
            deps.push(dependency.to_string());
        }
    }

    /// Recompute roots from the current edges
    pub fn refresh_roots(&mut self) {
        self.roots = graph_utils::roots_of(&self.dependencies);
    }

    /// Get a task
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Direct dependencies of a task
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// First dependency cycle, if any
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        graph_utils::find_cycle(self)
    }

    /// The graph restricted to `ids`, keeping only edges between them
    pub fn subgraph(&self, ids: &BTreeSet<String>) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for id in ids {
            if let Some(task) = self.tasks.get(id) {
                graph.add_task(task.clone());
                for dep in self.dependencies_of(id) {
                    if ids.contains(dep) {
                        graph.add_dependency(id, dep);
                    }
                }
            }
        }
        graph.refresh_roots();
        graph
    }

    /// Tasks grouped by execution wave.
    ///
    /// Wave 0 holds the roots; every other task sits one wave after its
    /// latest dependency. Tasks on a cycle are not placed.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let order = graph_utils::topological_order(&self.dependencies);
        let mut wave_of: HashMap<&str, usize> = HashMap::new();

        for id in &order {
            let wave = self
                .dependencies_of(id)
                .iter()
                .filter_map(|dep| wave_of.get(dep.as_str()))
                .max()
                .map(|w| w + 1)
                .unwrap_or(0);
            wave_of.insert(id.as_str(), wave);
        }

        let wave_count = wave_of.values().max().map(|w| w + 1).unwrap_or(0);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
        for id in &order {
            if let Some(&wave) = wave_of.get(id.as_str()) {
                waves[wave].push(id.clone());
            }
        }
        waves
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves().iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for id in wave {
                if let Some(task) = self.tasks.get(id) {
                    let run = task
                        .option_str("command")
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("<{}>", task.executor));
                    let deps = self.dependencies_of(id);
                    if deps.is_empty() {
                        plan.push_str(&format!("  {} -> {}\n", id, run));
                    } else {
                        plan.push_str(&format!("  {} -> {} (after: {})\n", id, run, deps.join(", ")));
                    }
                }
            }
        }
        plan
    }
}

impl DependencyGraph for TaskGraph {
    fn dependency_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.dependencies
    }
}

impl MutableDependencyGraph for TaskGraph {
    fn dependency_map_mut(&mut self) -> &mut BTreeMap<String, Vec<String>> {
        &mut self.dependencies
    }

    fn set_roots(&mut self, roots: Vec<String>) {
        self.roots = roots;
    }
}

struct TaskGraphBuilder<'a> {
    project_graph: &'a ProjectGraph,
    graph: TaskGraph,
}

impl<'a> TaskGraphBuilder<'a> {
    /// Add the task and everything it depends on; returns its id
    fn add_task(
        &mut self,
        project: &'a ProjectNode,
        target_name: &str,
        configuration: Option<&str>,
        overrides: &[String],
    ) -> Result<String, TaskGraphError> {
        let target = project
            .targets
            .get(target_name)
            .ok_or_else(|| TaskGraphError::TargetNotFound {
                project: project.name.clone(),
                target: target_name.to_string(),
            })?;

        let configuration = resolve_configuration(target, configuration);
        let task_target =
            TaskTarget::new(&project.name, target_name).with_configuration(configuration.clone());
        let id = task_target.id();
        if self.graph.tasks.contains_key(&id) {
            return Ok(id);
        }

        let task = create_task(project, target, task_target, overrides);
        debug!(task = %id, executor = %task.executor, "adding task");
        self.graph.add_task(task);

        for dependency in target.depends_on.iter().flatten() {
            let dep_ids = match dependency.scope() {
                DependencyScope::SameProject(dep_target) => {
                    if !project.targets.contains_key(&dep_target) {
                        return Err(TaskGraphError::MissingDependencyTarget {
                            task: id,
                            target: dep_target,
                        });
                    }
                    vec![self.add_task(project, &dep_target, configuration.as_deref(), &[])?]
                }
                DependencyScope::DependencyProjects(dep_target) => {
                    let mut seen = HashSet::from([project.name.clone()]);
                    self.dependency_project_tasks(
                        &project.name,
                        &dep_target,
                        configuration.as_deref(),
                        &mut seen,
                    )?
                }
                DependencyScope::Projects { projects, target: dep_target } => {
                    let project_graph = self.project_graph;
                    let mut ids = Vec::new();
                    for name in &projects {
                        let node = project_graph
                            .get(name)
                            .ok_or_else(|| TaskGraphError::UnknownProject(name.clone()))?;
                        if node.targets.contains_key(&dep_target) {
                            ids.push(self.add_task(node, &dep_target, configuration.as_deref(), &[])?);
                        }
                    }
                    ids
                }
            };

            for dep_id in dep_ids {
                self.graph.add_dependency(&id, &dep_id);
            }
        }

        Ok(id)
    }

    /// Tasks for `target` in the dependencies of `project`. A dependency
    /// without the target is looked through to its own dependencies.
    fn dependency_project_tasks(
        &mut self,
        project: &str,
        target: &str,
        configuration: Option<&str>,
        seen: &mut HashSet<String>,
    ) -> Result<Vec<String>, TaskGraphError> {
        let project_graph = self.project_graph;
        let mut ids = Vec::new();
        for dep in project_graph.project_dependencies(project) {
            if !seen.insert(dep.to_string()) {
                continue;
            }
            let Some(node) = project_graph.get(dep) else {
                continue;
            };
            if node.targets.contains_key(target) {
                ids.push(self.add_task(node, target, configuration, &[])?);
            } else {
                ids.extend(self.dependency_project_tasks(dep, target, configuration, seen)?);
            }
        }
        Ok(ids)
    }
}

/// The configuration a target runs with: the requested one if the target
/// defines it, otherwise its default configuration
fn resolve_configuration(target: &TargetConfiguration, requested: Option<&str>) -> Option<String> {
    requested
        .filter(|c| target.configurations.contains_key(*c))
        .map(str::to_string)
        .or_else(|| target.default_configuration.clone())
}

fn create_task(
    project: &ProjectNode,
    target: &TargetConfiguration,
    task_target: TaskTarget,
    overrides: &[String],
) -> Task {
    let mut options = target.options_for(task_target.configuration.as_deref());
    if let Some(command) = &target.command {
        options
            .entry("command".to_string())
            .or_insert_with(|| Value::String(command.clone()));
    }

    let outputs = target
        .outputs
        .iter()
        .flatten()
        .map(|output| interpolate(output, &project.root, &project.name, &options))
        .collect();

    let mut task = Task::new(task_target, project.root.clone())
        .with_executor(target.executor_name())
        .with_cache(target.is_cacheable())
        .with_outputs(outputs);
    task.options = options;
    task.overrides = overrides.to_vec();
    task
}

/// Substitute `{projectRoot}`, `{projectName}`, `{workspaceRoot}` and
/// `{options.<key>}` tokens, yielding a path relative to the workspace root.
///
/// A leading `!` is preserved so negated globs survive substitution.
pub fn interpolate(
    template: &str,
    project_root: &str,
    project_name: &str,
    options: &BTreeMap<String, Value>,
) -> String {
    let (negated, template) = match template.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, template),
    };

    let mut result = template
        .replace("{workspaceRoot}", "")
        .replace("{projectRoot}", project_root)
        .replace("{projectName}", project_name);

    for (key, value) in options {
        let token = format!("{{options.{}}}", key);
        if result.contains(&token) {
            if let Some(value) = value.as_str() {
                result = result.replace(&token, value);
            }
        }
    }

    let mut normalized = result.as_str();
    loop {
        if let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest;
        } else if let Some(rest) = normalized.strip_prefix('/') {
            normalized = rest;
        } else {
            break;
        }
    }
    let normalized = if normalized == "." { "" } else { normalized };

    if negated {
        format!("!{}", normalized)
    } else {
        normalized.to_string()
    }
}

/// Errors during task graph construction
#[derive(Debug, thiserror::Error)]
pub enum TaskGraphError {
    /// A project name does not exist in the project graph
    #[error("Project '{0}' not found in the workspace")]
    UnknownProject(String),

    /// A requested `project:target` does not exist
    #[error("Cannot find target '{target}' in project '{project}'")]
    TargetNotFound { project: String, target: String },

    /// No selected project defines the requested target
    #[error("No projects have a target named '{0}'")]
    NoProjectsWithTarget(String),

    /// A same-project `depends_on` entry names a missing target
    #[error("Task '{task}' depends on missing target '{target}' in the same project")]
    MissingDependencyTarget { task: String, target: String },

    /// A requested target string could not be parsed
    #[error("Invalid target '{0}', expected project:target[:configuration]")]
    InvalidTarget(String),

    /// Circular task dependencies
    #[error("Circular task dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}
