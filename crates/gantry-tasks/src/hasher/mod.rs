//! Task hashing
//!
//! A task's hash covers everything that can change its result: the resolved
//! command, the files named by its inputs, the hashes of the tasks it depends
//! on, runtime command output, environment variables and external package
//! versions. Each category is recorded in `details`, and the final value is
//! a SHA-256 over the sorted `key=value` lines of those details.

pub mod file_hasher;
pub mod inputs;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use gantry_core::graph_utils;
use gantry_core::project_graph::inputs::default_target_inputs;
use gantry_core::project_graph::{ProjectGraph, ProjectNode};

use crate::task::Task;
use crate::task_graph::{interpolate, TaskGraph};

pub use file_hasher::{FileHasher, WorkspaceFileHasher};
pub use inputs::{DependencyInput, HashPlan, InputError};

/// Detail value recorded for a dependency already on the hashing chain
pub const CIRCULAR: &str = "circular";

/// A hash plus the sub-hashes it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialHash {
    pub value: String,
    pub details: BTreeMap<String, String>,
}

impl PartialHash {
    /// Combine details into a hash
    pub fn from_details(details: BTreeMap<String, String>) -> Self {
        let lines: Vec<String> = details.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Self {
            value: hash_str(&lines.join("\n")),
            details,
        }
    }
}

/// Workspace-wide inputs shared by every task
#[derive(Debug, Clone, Default)]
pub struct HasherOptions {
    /// Filesets at the workspace root hashed into every task
    pub global_inputs: Vec<String>,
    /// `compilerOptions.paths` of the root tsconfig
    pub tsconfig_paths: BTreeMap<String, Vec<String>>,
}

/// Computes task hashes. One instance lives for one invocation and memoizes
/// runtime inputs, external package hashes, project input hashes and task
/// hashes.
pub struct TaskHasher {
    workspace_root: PathBuf,
    project_graph: Arc<ProjectGraph>,
    file_hasher: Arc<dyn FileHasher>,
    options: HasherOptions,
    runtime_values: Mutex<HashMap<String, String>>,
    external_hashes: OnceLock<BTreeMap<String, String>>,
    project_inputs: Mutex<HashMap<(String, String), PartialHash>>,
    task_hashes: Mutex<HashMap<String, PartialHash>>,
}

impl TaskHasher {
    /// Create a hasher
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        project_graph: Arc<ProjectGraph>,
        file_hasher: Arc<dyn FileHasher>,
        options: HasherOptions,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            project_graph,
            file_hasher,
            options,
            runtime_values: Mutex::new(HashMap::new()),
            external_hashes: OnceLock::new(),
            project_inputs: Mutex::new(HashMap::new()),
            task_hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Hash several tasks. Failures are per task.
    pub fn hash_tasks(
        &self,
        tasks: &[&Task],
        task_graph: &TaskGraph,
        env: &BTreeMap<String, String>,
    ) -> Vec<Result<PartialHash, HashError>> {
        tasks
            .iter()
            .map(|task| self.hash_task(task, task_graph, env, &[]))
            .collect()
    }

    /// Hash one task. `visited` is the chain of task ids currently being
    /// hashed; a dependency already on it is recorded as circular.
    #[instrument(skip_all, fields(task = %task.id))]
    pub fn hash_task(
        &self,
        task: &Task,
        task_graph: &TaskGraph,
        env: &BTreeMap<String, String>,
        visited: &[String],
    ) -> Result<PartialHash, HashError> {
        if let Some(hash) = lock(&self.task_hashes).get(&task.id) {
            return Ok(hash.clone());
        }

        let (project, plan) = self.plan(task)?;

        let mut details = BTreeMap::new();
        details.insert("command".to_string(), hash_command(task)?);
        self.hash_self_inputs(project, &plan, env, &mut details)?;

        let externals = match &plan.external {
            Some(names) => names.clone(),
            None => self
                .project_graph
                .external_dependencies(&project.name)
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        let external_hashes = self.external_hashes();
        for name in externals {
            let value = external_hashes
                .get(&name)
                .cloned()
                .unwrap_or_else(|| hash_str(&name));
            details.insert(format!("external:{}", name), value);
        }

        let chain = vec![project.name.clone()];
        for dep_input in &plan.dependency_inputs {
            for dep in self.project_graph.project_dependencies(&project.name) {
                let key = format!("{}:{}", dep, dep_input.label());
                let value = if chain.iter().any(|p| p == dep) {
                    CIRCULAR.to_string()
                } else {
                    self.hash_project_input(dep, dep_input, env, &chain)?.0.value
                };
                details.insert(key, value);
            }
        }

        for outputs in &plan.dependency_outputs {
            let value = self.hash_dependency_outputs(task, task_graph, &outputs.glob, outputs.transitive)?;
            details.insert(format!("outputs:{}", outputs.glob), value);
        }

        let mut chain: Vec<String> = visited.to_vec();
        chain.push(task.id.clone());
        for dep_id in task_graph.dependencies_of(&task.id) {
            let value = if chain.contains(dep_id) {
                CIRCULAR.to_string()
            } else {
                match task_graph.get(dep_id) {
                    Some(dep_task) => self.hash_task(dep_task, task_graph, env, &chain)?.value,
                    None => continue,
                }
            };
            details.insert(format!("task:{}", dep_id), value);
        }

        if !self.options.global_inputs.is_empty() {
            let patterns: Vec<String> = self
                .options
                .global_inputs
                .iter()
                .map(|p| interpolate(p, "", "", &BTreeMap::new()))
                .collect();
            details.insert("global".to_string(), self.hash_fileset(&patterns)?);
        }

        if let Some(tsconfig) = self.tsconfig_slice(project) {
            details.insert("tsconfig".to_string(), tsconfig);
        }

        let hash = PartialHash::from_details(details);
        debug!(task = %task.id, hash = %hash.value, "task hashed");
        lock(&self.task_hashes).insert(task.id.clone(), hash.clone());
        Ok(hash)
    }

    /// Whether the task's inputs include files produced by its dependencies.
    /// Such a task can only be hashed once those dependencies have run.
    pub fn reads_dependency_outputs(&self, task: &Task) -> bool {
        self.plan(task)
            .is_ok_and(|(_, plan)| !plan.dependency_outputs.is_empty())
    }

    fn plan(&self, task: &Task) -> Result<(&ProjectNode, HashPlan), HashError> {
        let project = self
            .project_graph
            .get(&task.target.project)
            .ok_or_else(|| HashError::UnknownProject(task.target.project.clone()))?;
        let target = project
            .targets
            .get(&task.target.target)
            .ok_or_else(|| HashError::UnknownTarget {
                project: project.name.clone(),
                target: task.target.target.clone(),
            })?;
        let inputs = target.inputs.clone().unwrap_or_else(default_target_inputs);
        let plan = HashPlan::expand(project, &inputs)?;
        Ok((project, plan))
    }

    /// Filesets, runtime and env inputs of a project
    fn hash_self_inputs(
        &self,
        project: &ProjectNode,
        plan: &HashPlan,
        env: &BTreeMap<String, String>,
        details: &mut BTreeMap<String, String>,
    ) -> Result<(), HashError> {
        if !plan.filesets.is_empty() {
            let patterns = self.project_patterns(project, &plan.filesets);
            details.insert(format!("{}:$filesets", project.name), self.hash_fileset(&patterns)?);
        }
        for command in &plan.runtime {
            details.insert(format!("runtime:{}", command), self.hash_runtime(command, env)?);
        }
        for key in &plan.env {
            // unset and empty hash the same
            let value = env.get(key).map(String::as_str).unwrap_or("");
            details.insert(format!("env:{}", key), hash_str(value));
        }
        Ok(())
    }

    /// Hash of a named input (or `^` fileset) of a dependency project,
    /// including the same input of its own dependencies.
    ///
    /// The flag is set when a `circular` marker was recorded anywhere below,
    /// which makes the value depend on the chain it was reached through.
    /// Only chain-independent values are memoized.
    fn hash_project_input(
        &self,
        project_name: &str,
        input: &DependencyInput,
        env: &BTreeMap<String, String>,
        chain: &[String],
    ) -> Result<(PartialHash, bool), HashError> {
        let memo_key = (project_name.to_string(), input.label().to_string());
        if let Some(hash) = lock(&self.project_inputs).get(&memo_key) {
            return Ok((hash.clone(), false));
        }

        let project = self
            .project_graph
            .get(project_name)
            .ok_or_else(|| HashError::UnknownProject(project_name.to_string()))?;

        let plan = match input {
            DependencyInput::Fileset(pattern) => HashPlan {
                filesets: vec![pattern.clone()],
                ..Default::default()
            },
            DependencyInput::Named(name) => HashPlan::expand_named(project, name)?,
        };

        let mut details = BTreeMap::new();
        self.hash_self_inputs(project, &plan, env, &mut details)?;

        let mut chain = chain.to_vec();
        chain.push(project.name.clone());
        let mut circular = false;
        for dep in self.project_graph.project_dependencies(&project.name) {
            let key = format!("{}:{}", dep, input.label());
            let value = if chain.iter().any(|p| p == dep) {
                circular = true;
                CIRCULAR.to_string()
            } else {
                let (hash, below) = self.hash_project_input(dep, input, env, &chain)?;
                circular |= below;
                hash.value
            };
            details.insert(key, value);
        }
        let external_hashes = self.external_hashes();
        for dep in self.project_graph.external_dependencies(&project.name) {
            if let Some(value) = external_hashes.get(dep) {
                details.insert(format!("external:{}", dep), value.clone());
            }
        }

        let hash = PartialHash::from_details(details);
        if !circular {
            lock(&self.project_inputs).insert(memo_key, hash.clone());
        }
        Ok((hash, circular))
    }

    /// Files matching `glob` inside the outputs of the task's dependencies
    fn hash_dependency_outputs(
        &self,
        task: &Task,
        task_graph: &TaskGraph,
        glob: &str,
        transitive: bool,
    ) -> Result<String, HashError> {
        let dep_ids: BTreeSet<String> = if transitive {
            graph_utils::transitive_dependencies(&task_graph.dependencies, &task.id)
        } else {
            task_graph.dependencies_of(&task.id).iter().cloned().collect()
        };

        let patterns: Vec<String> = dep_ids
            .iter()
            .filter_map(|id| task_graph.get(id))
            .flat_map(|dep| dep.outputs.iter())
            .map(|output| format!("{}/{}", output.trim_end_matches('/'), glob))
            .collect();

        if patterns.is_empty() {
            return Ok(hash_str(""));
        }
        self.hash_fileset(&patterns)
    }

    fn hash_fileset(&self, patterns: &[String]) -> Result<String, HashError> {
        let files = self
            .file_hasher
            .hash_files_matching_globs(&self.workspace_root, patterns)?;
        let lines: Vec<String> = files.iter().map(|(p, h)| format!("{}:{}", p, h)).collect();
        Ok(hash_str(&lines.join("\n")))
    }

    fn project_patterns(&self, project: &ProjectNode, filesets: &[String]) -> Vec<String> {
        filesets
            .iter()
            .map(|f| interpolate(f, &project.root, &project.name, &BTreeMap::new()))
            .collect()
    }

    /// Trimmed stdout of a runtime input command, run once per hasher
    fn hash_runtime(&self, command: &str, env: &BTreeMap<String, String>) -> Result<String, HashError> {
        if let Some(value) = lock(&self.runtime_values).get(command) {
            return Ok(value.clone());
        }

        debug!(command, "running runtime input");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace_root)
            .env_clear()
            .envs(env)
            .output()
            .map_err(|e| HashError::RuntimeInput {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(HashError::RuntimeInput {
                command: command.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let value = hash_str(String::from_utf8_lossy(&output.stdout).trim());
        lock(&self.runtime_values).insert(command.to_string(), value.clone());
        Ok(value)
    }

    /// Hash of every external node, computed once: its name and version plus
    /// the hashes of the external nodes it depends on
    fn external_hashes(&self) -> &BTreeMap<String, String> {
        self.external_hashes.get_or_init(|| {
            let graph = &self.project_graph;
            let deps: BTreeMap<String, Vec<String>> = graph
                .external_nodes
                .keys()
                .map(|name| {
                    let deps = graph
                        .external_dependencies(name)
                        .into_iter()
                        .map(str::to_string)
                        .collect();
                    (name.clone(), deps)
                })
                .collect();

            deps.keys()
                .map(|name| {
                    let mut closure: Vec<String> = graph_utils::transitive_dependencies(&deps, name)
                        .into_iter()
                        .chain([name.clone()])
                        .filter_map(|n| graph.external_nodes.get(&n))
                        .map(|node| format!("{}@{}", node.name, node.version))
                        .collect();
                    closure.sort();
                    (name.clone(), hash_str(&closure.join("\n")))
                })
                .collect()
        })
    }

    /// The path mappings that point into the project
    fn tsconfig_slice(&self, project: &ProjectNode) -> Option<String> {
        if self.options.tsconfig_paths.is_empty() {
            return None;
        }
        let root = project.root.trim_start_matches("./").trim_end_matches('/');
        let relevant: BTreeMap<&String, &Vec<String>> = self
            .options
            .tsconfig_paths
            .iter()
            .filter(|(_, paths)| {
                paths.iter().any(|p| {
                    let p = p.trim_start_matches("./");
                    root.is_empty() || p == root || p.starts_with(&format!("{}/", root))
                })
            })
            .collect();
        let json = serde_json::to_string(&relevant).unwrap_or_default();
        Some(hash_str(&json))
    }
}

/// Read `compilerOptions.paths` from the root `tsconfig.base.json` or
/// `tsconfig.json`. Files that fail to parse are ignored with a warning.
pub fn read_tsconfig_paths(workspace_root: &Path) -> BTreeMap<String, Vec<String>> {
    for name in ["tsconfig.base.json", "tsconfig.json"] {
        let path = workspace_root.join(name);
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not parse tsconfig, ignoring");
                return BTreeMap::new();
            }
        };
        let paths = value
            .pointer("/compilerOptions/paths")
            .cloned()
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        return paths;
    }
    BTreeMap::new()
}

fn hash_command(task: &Task) -> Result<String, HashError> {
    #[derive(Serialize)]
    struct CommandIdentity<'a> {
        project: &'a str,
        target: &'a str,
        configuration: Option<&'a str>,
        executor: &'a str,
        options: &'a BTreeMap<String, serde_json::Value>,
        overrides: &'a [String],
    }

    let identity = CommandIdentity {
        project: &task.target.project,
        target: &task.target.target,
        configuration: task.target.configuration.as_deref(),
        executor: &task.executor,
        options: &task.options,
        overrides: &task.overrides,
    };
    let json = serde_json::to_string(&identity).map_err(|e| HashError::Serialize(e.to_string()))?;
    Ok(hash_str(&json))
}

fn hash_str(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Errors computing a task hash
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The task's project is not in the project graph
    #[error("Project '{0}' not found in the project graph")]
    UnknownProject(String),

    /// The task's target is not defined on its project
    #[error("Target '{target}' not found in project '{project}'")]
    UnknownTarget { project: String, target: String },

    /// Malformed named inputs
    #[error(transparent)]
    Input(#[from] InputError),

    /// A runtime input command failed
    #[error("Runtime input '{command}' failed: {message}")]
    RuntimeInput { command: String, message: String },

    /// An input file could not be read
    #[error("Cannot read input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Walking an input directory failed
    #[error("Cannot walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    /// A fileset pattern is not a valid glob
    #[error("Invalid glob '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    /// The command identity could not be serialized
    #[error("Cannot serialize task options: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::file_hasher::StaticFileHasher;
    use super::*;
    use gantry_core::project_graph::{DependencyKind, InputDefinition, TargetConfiguration};
    use tempfile::TempDir;

    fn project_graph() -> ProjectGraph {
        let build = TargetConfiguration {
            command: Some("tsc".to_string()),
            inputs: Some(vec![InputDefinition::named("default"), InputDefinition::named("^default")]),
            cache: Some(true),
            ..Default::default()
        };
        let mut graph = ProjectGraph::new();
        graph.add_external_node("npm:react", "18.2.0");
        graph.add_external_node("npm:loose-envify", "1.4.0");
        graph.add_project(ProjectNode::new("ui", "libs/ui").with_target("build", build.clone()));
        graph.add_project(ProjectNode::new("web", "apps/web").with_target("build", build));
        graph.add_dependency("web", "ui", DependencyKind::Static).unwrap();
        graph.add_dependency("ui", "npm:react", DependencyKind::External).unwrap();
        graph
            .add_dependency("npm:react", "npm:loose-envify", DependencyKind::External)
            .unwrap();
        graph
    }

    fn files() -> StaticFileHasher {
        StaticFileHasher::with_files(&[
            ("libs/ui/src/index.ts", "h-ui"),
            ("apps/web/src/main.ts", "h-web"),
            ("apps/web/README.md", "h-readme"),
        ])
    }

    fn task_graph(graph: &ProjectGraph) -> TaskGraph {
        let mut tasks = TaskGraph::new();
        for name in ["ui", "web"] {
            let node = graph.get(name).unwrap();
            tasks.add_task(
                Task::new(crate::task::TaskTarget::new(name, "build"), node.root.clone())
                    .with_command("tsc")
                    .with_cache(true),
            );
        }
        tasks.add_dependency("web:build", "ui:build");
        tasks.refresh_roots();
        tasks
    }

    fn hasher_with(graph: ProjectGraph, files: StaticFileHasher) -> TaskHasher {
        TaskHasher::new("/workspace", Arc::new(graph), Arc::new(files), HasherOptions::default())
    }

    #[test]
    fn test_hash_is_deterministic() {
        let graph = project_graph();
        let tasks = task_graph(&graph);
        let env = BTreeMap::new();

        let first = hasher_with(graph.clone(), files())
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &env, &[])
            .unwrap();
        let second = hasher_with(graph, files())
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &env, &[])
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_details_cover_inputs() {
        let graph = project_graph();
        let tasks = task_graph(&graph);
        let hasher = hasher_with(graph, files());
        let hash = hasher
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &BTreeMap::new(), &[])
            .unwrap();

        for key in ["command", "web:$filesets", "ui:default", "task:ui:build"] {
            assert!(hash.details.contains_key(key), "missing {}", key);
        }

        let ui = hasher
            .hash_task(tasks.get("ui:build").unwrap(), &tasks, &BTreeMap::new(), &[])
            .unwrap();
        assert!(ui.details.contains_key("external:npm:react"));
        assert_eq!(hash.details["task:ui:build"], ui.value);
    }

    #[test]
    fn test_dependency_source_change_changes_hash() {
        let graph = project_graph();
        let tasks = task_graph(&graph);
        let env = BTreeMap::new();

        let before = hasher_with(graph.clone(), files())
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &env, &[])
            .unwrap();

        let mut changed = files();
        changed.files.insert("libs/ui/src/index.ts".into(), "h-ui-2".into());
        let after = hasher_with(graph, changed)
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &env, &[])
            .unwrap();

        assert_ne!(before.value, after.value);
        assert_ne!(before.details["ui:default"], after.details["ui:default"]);
        assert_eq!(before.details["web:$filesets"], after.details["web:$filesets"]);
    }

    #[test]
    fn test_external_version_change_changes_hash() {
        let graph = project_graph();
        let tasks = task_graph(&graph);
        let env = BTreeMap::new();
        let before = hasher_with(graph.clone(), files())
            .hash_task(tasks.get("ui:build").unwrap(), &tasks, &env, &[])
            .unwrap();

        let mut upgraded = graph;
        upgraded.add_external_node("npm:loose-envify", "1.5.0");
        let after = hasher_with(upgraded, files())
            .hash_task(tasks.get("ui:build").unwrap(), &tasks, &env, &[])
            .unwrap();

        assert_ne!(before.details["external:npm:react"], after.details["external:npm:react"]);
    }

    #[test]
    fn test_env_input_unset_equals_empty() {
        let mut graph = project_graph();
        let web = graph.nodes.get_mut("web").unwrap();
        web.targets.get_mut("build").unwrap().inputs =
            Some(vec![InputDefinition::Env { env: "API_URL".into() }]);
        let tasks = task_graph(&graph);
        let task = tasks.get("web:build").unwrap();

        let unset = hasher_with(graph.clone(), files())
            .hash_task(task, &tasks, &BTreeMap::new(), &[])
            .unwrap();
        let empty = hasher_with(graph.clone(), files())
            .hash_task(task, &tasks, &BTreeMap::from([("API_URL".into(), String::new())]), &[])
            .unwrap();
        let set = hasher_with(graph, files())
            .hash_task(task, &tasks, &BTreeMap::from([("API_URL".into(), "x".into())]), &[])
            .unwrap();

        assert_eq!(unset.value, empty.value);
        assert_ne!(unset.value, set.value);
    }

    #[test]
    fn test_runtime_input() {
        let temp = TempDir::new().unwrap();
        let env: BTreeMap<String, String> = std::env::vars().filter(|(k, _)| k == "PATH").collect();
        let mut graph = project_graph();
        graph.nodes.get_mut("web").unwrap().targets.get_mut("build").unwrap().inputs = Some(vec![
            InputDefinition::Runtime { runtime: "echo 1.2.3".into() },
        ]);
        let tasks = task_graph(&graph);
        let hasher = TaskHasher::new(temp.path(), Arc::new(graph.clone()), Arc::new(files()), HasherOptions::default());
        let hash = hasher
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &env, &[])
            .unwrap();
        assert_eq!(hash.details["runtime:echo 1.2.3"], hash_str("1.2.3"));

        graph.nodes.get_mut("web").unwrap().targets.get_mut("build").unwrap().inputs = Some(vec![
            InputDefinition::Runtime { runtime: "exit 3".into() },
        ]);
        let hasher = TaskHasher::new(temp.path(), Arc::new(graph), Arc::new(files()), HasherOptions::default());
        let err = hasher
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &env, &[])
            .unwrap_err();
        assert!(matches!(err, HashError::RuntimeInput { .. }));
    }

    #[test]
    fn test_circular_project_dependencies_terminate() {
        let mut graph = project_graph();
        graph.add_dependency("ui", "web", DependencyKind::Static).unwrap();
        let mut tasks = task_graph(&graph);
        tasks.add_dependency("ui:build", "web:build");

        let hasher = hasher_with(graph, files());
        let hash = hasher
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &BTreeMap::new(), &[])
            .unwrap();
        assert_eq!(hash.details["ui:default"].len(), 64);

        let ui = hasher
            .hash_task(tasks.get("ui:build").unwrap(), &tasks, &BTreeMap::new(), &[])
            .unwrap();
        assert_eq!(ui.details["task:web:build"], CIRCULAR);
    }

    /// lib <- ui <- web, each build reading `*.d.ts` from dependency outputs
    fn output_reading_graphs(transitive: bool) -> (ProjectGraph, TaskGraph) {
        let build = TargetConfiguration {
            command: Some("tsc".to_string()),
            inputs: Some(vec![InputDefinition::DependentTasksOutputFiles {
                dependent_tasks_output_files: "**/*.d.ts".to_string(),
                transitive,
            }]),
            cache: Some(true),
            ..Default::default()
        };
        let mut graph = ProjectGraph::new();
        let mut tasks = TaskGraph::new();
        for (name, root) in [("lib", "libs/lib"), ("ui", "libs/ui"), ("web", "apps/web")] {
            graph.add_project(ProjectNode::new(name, root).with_target("build", build.clone()));
            tasks.add_task(
                Task::new(crate::task::TaskTarget::new(name, "build"), root)
                    .with_command("tsc")
                    .with_cache(true)
                    .with_outputs(vec![format!("dist/{}", root)]),
            );
        }
        graph.add_dependency("ui", "lib", DependencyKind::Static).unwrap();
        graph.add_dependency("web", "ui", DependencyKind::Static).unwrap();
        tasks.add_dependency("ui:build", "lib:build");
        tasks.add_dependency("web:build", "ui:build");
        tasks.refresh_roots();
        (graph, tasks)
    }

    fn built_files() -> StaticFileHasher {
        StaticFileHasher::with_files(&[
            ("dist/libs/lib/index.d.ts", "h-lib-types"),
            ("dist/libs/ui/index.d.ts", "h-ui-types"),
            ("dist/libs/ui/index.js", "h-ui-js"),
        ])
    }

    fn outputs_detail(graph: &ProjectGraph, tasks: &TaskGraph, files: StaticFileHasher) -> String {
        hasher_with(graph.clone(), files)
            .hash_task(tasks.get("web:build").unwrap(), tasks, &BTreeMap::new(), &[])
            .unwrap()
            .details["outputs:**/*.d.ts"]
            .clone()
    }

    #[test]
    fn test_dependency_output_change_changes_hash() {
        let (graph, tasks) = output_reading_graphs(false);
        let hasher = hasher_with(graph.clone(), built_files());
        assert!(hasher.reads_dependency_outputs(tasks.get("web:build").unwrap()));

        let before = outputs_detail(&graph, &tasks, built_files());

        let mut changed = built_files();
        changed.files.insert("dist/libs/ui/index.d.ts".into(), "h-ui-types-2".into());
        assert_ne!(before, outputs_detail(&graph, &tasks, changed));

        // outside the glob
        let mut changed = built_files();
        changed.files.insert("dist/libs/ui/index.js".into(), "h-ui-js-2".into());
        assert_eq!(before, outputs_detail(&graph, &tasks, changed));

        // only direct dependencies
        let mut changed = built_files();
        changed.files.insert("dist/libs/lib/index.d.ts".into(), "h-lib-types-2".into());
        assert_eq!(before, outputs_detail(&graph, &tasks, changed));

        let empty = outputs_detail(&graph, &tasks, StaticFileHasher::with_files(&[]));
        assert_ne!(before, empty);
    }

    #[test]
    fn test_transitive_dependency_outputs() {
        let (graph, tasks) = output_reading_graphs(true);
        let before = outputs_detail(&graph, &tasks, built_files());

        let mut changed = built_files();
        changed.files.insert("dist/libs/lib/index.d.ts".into(), "h-lib-types-2".into());
        assert_ne!(before, outputs_detail(&graph, &tasks, changed));
    }

    #[test]
    fn test_reads_dependency_outputs_only_when_declared() {
        let graph = project_graph();
        let tasks = task_graph(&graph);
        let hasher = hasher_with(graph, files());
        assert!(!hasher.reads_dependency_outputs(tasks.get("web:build").unwrap()));
    }

    #[test]
    fn test_project_cycle_hash_independent_of_order() {
        let build = TargetConfiguration {
            command: Some("tsc".to_string()),
            inputs: Some(vec![InputDefinition::named("default"), InputDefinition::named("^default")]),
            cache: Some(true),
            ..Default::default()
        };
        let mut graph = ProjectGraph::new();
        let mut tasks = TaskGraph::new();
        for name in ["a", "b", "c"] {
            let root = format!("libs/{}", name);
            graph.add_project(ProjectNode::new(name, root.clone()).with_target("build", build.clone()));
            tasks.add_task(
                Task::new(crate::task::TaskTarget::new(name, "build"), root)
                    .with_command("tsc")
                    .with_cache(true),
            );
        }
        graph.add_dependency("a", "b", DependencyKind::Static).unwrap();
        graph.add_dependency("b", "c", DependencyKind::Static).unwrap();
        graph.add_dependency("c", "a", DependencyKind::Static).unwrap();
        tasks.refresh_roots();

        let files = || {
            StaticFileHasher::with_files(&[
                ("libs/a/index.ts", "h-a"),
                ("libs/b/index.ts", "h-b"),
                ("libs/c/index.ts", "h-c"),
            ])
        };
        let env = BTreeMap::new();

        let alone = hasher_with(graph.clone(), files())
            .hash_task(tasks.get("a:build").unwrap(), &tasks, &env, &[])
            .unwrap();

        let hasher = hasher_with(graph, files());
        hasher
            .hash_task(tasks.get("c:build").unwrap(), &tasks, &env, &[])
            .unwrap();
        let after_c = hasher
            .hash_task(tasks.get("a:build").unwrap(), &tasks, &env, &[])
            .unwrap();

        assert_eq!(alone, after_c);
    }

    #[test]
    fn test_tsconfig_slice_only_for_matching_project() {
        let graph = project_graph();
        let tasks = task_graph(&graph);
        let options = HasherOptions {
            tsconfig_paths: BTreeMap::from([("@acme/ui".to_string(), vec!["libs/ui/src/index.ts".to_string()])]),
            ..Default::default()
        };
        let hasher = TaskHasher::new("/workspace", Arc::new(graph), Arc::new(files()), options.clone());
        let ui = hasher
            .hash_task(tasks.get("ui:build").unwrap(), &tasks, &BTreeMap::new(), &[])
            .unwrap();
        let web = hasher
            .hash_task(tasks.get("web:build").unwrap(), &tasks, &BTreeMap::new(), &[])
            .unwrap();
        assert_ne!(ui.details["tsconfig"], web.details["tsconfig"]);
    }

    #[test]
    fn test_read_tsconfig_paths() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("tsconfig.base.json"),
            r#"{ "compilerOptions": { "paths": { "@acme/ui": ["libs/ui/src/index.ts"] } } }"#,
        )
        .unwrap();
        let paths = read_tsconfig_paths(temp.path());
        assert_eq!(paths["@acme/ui"], vec!["libs/ui/src/index.ts"]);
        assert!(read_tsconfig_paths(&temp.path().join("missing")).is_empty());
    }
}
