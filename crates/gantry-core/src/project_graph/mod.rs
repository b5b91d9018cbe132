//! Project graph consumed by the task engine
//!
//! The graph is read-only once built. Nodes are workspace projects, external
//! nodes are third-party packages, and edges record which project depends on
//! which project or package.

pub mod inputs;
pub mod target;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::ProjectGraphError;
use crate::graph_utils;

pub use inputs::{InputDefinition, DEFAULT_FILESET, DEFAULT_NAMED_INPUT};
pub use target::{DependencyScope, TargetConfiguration, TargetDependency, DEFAULT_EXECUTOR};

/// A workspace project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    /// Project name
    pub name: String,
    /// Root directory relative to the workspace root
    pub root: String,
    /// Targets with target defaults already merged in
    pub targets: BTreeMap<String, TargetConfiguration>,
    /// Named inputs (workspace-level definitions merged with project overrides)
    pub named_inputs: BTreeMap<String, Vec<InputDefinition>>,
}

impl ProjectNode {
    /// Create a project with no targets
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            targets: BTreeMap::new(),
            named_inputs: BTreeMap::new(),
        }
    }

    /// Add a target
    pub fn with_target(mut self, name: impl Into<String>, target: TargetConfiguration) -> Self {
        self.targets.insert(name.into(), target);
        self
    }

    /// Add a named input
    pub fn with_named_input(mut self, name: impl Into<String>, inputs: Vec<InputDefinition>) -> Self {
        self.named_inputs.insert(name.into(), inputs);
        self
    }
}

/// A third-party package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNode {
    /// Package name, e.g. `npm:react`
    pub name: String,
    /// Resolved version
    pub version: String,
}

/// Kind of a dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Declared dependency between projects
    Static,
    /// Dependency declared only for task ordering and hashing
    Implicit,
    /// Dependency on an external package
    External,
}

/// An edge from one node to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub kind: DependencyKind,
}

/// Project graph for the workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectGraph {
    /// Projects by name
    pub nodes: BTreeMap<String, ProjectNode>,
    /// External packages by name
    pub external_nodes: BTreeMap<String, ExternalNode>,
    /// Outgoing edges by source name
    pub dependencies: BTreeMap<String, Vec<DependencyEdge>>,
}

impl ProjectGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project node
    pub fn add_project(&mut self, node: ProjectNode) {
        self.dependencies.entry(node.name.clone()).or_default();
        self.nodes.insert(node.name.clone(), node);
    }

    /// Add an external package node
    pub fn add_external_node(&mut self, name: impl Into<String>, version: impl Into<String>) {
        let name = name.into();
        self.dependencies.entry(name.clone()).or_default();
        self.external_nodes.insert(
            name.clone(),
            ExternalNode {
                name,
                version: version.into(),
            },
        );
    }

    /// Add an edge. Both ends must already exist.
    pub fn add_dependency(
        &mut self,
        source: &str,
        target: &str,
        kind: DependencyKind,
    ) -> Result<(), ProjectGraphError> {
        let known = |name: &str| self.nodes.contains_key(name) || self.external_nodes.contains_key(name);
        if !known(target) || !known(source) {
            return Err(ProjectGraphError::UnknownProject {
                source_project: source.to_string(),
                target: target.to_string(),
            });
        }

        let edges = self.dependencies.entry(source.to_string()).or_default();
        if !edges.iter().any(|e| e.target == target) {
            edges.push(DependencyEdge {
                source: source.to_string(),
                target: target.to_string(),
                kind,
            });
        }
        Ok(())
    }

    /// Build the graph from workspace configuration
    #[instrument(skip_all, fields(projects = config.projects.len()))]
    pub fn from_config(config: &Config) -> Result<Self, ProjectGraphError> {
        let mut graph = Self::new();

        for (name, external) in &config.external_nodes {
            graph.add_external_node(name, &external.version);
        }

        for project in &config.projects {
            if graph.nodes.contains_key(&project.name) {
                return Err(ProjectGraphError::DuplicateProject(project.name.clone()));
            }

            let mut named_inputs = config.named_inputs.clone();
            named_inputs.extend(project.named_inputs.clone());

            let targets = project
                .targets
                .iter()
                .map(|(name, target)| {
                    let merged = match config.target_defaults.get(name) {
                        Some(defaults) => target.merged_over(defaults),
                        None => target.clone(),
                    };
                    (name.clone(), merged)
                })
                .collect();

            graph.add_project(ProjectNode {
                name: project.name.clone(),
                root: project.root.clone(),
                targets,
                named_inputs,
            });
        }

        for (name, external) in &config.external_nodes {
            for dep in &external.dependencies {
                graph.add_dependency(name, dep, DependencyKind::External)?;
            }
        }

        for project in &config.projects {
            for dep in &project.dependencies {
                graph.add_dependency(&project.name, dep, DependencyKind::Static)?;
            }
            for dep in &project.implicit_dependencies {
                graph.add_dependency(&project.name, dep, DependencyKind::Implicit)?;
            }
            for dep in &project.external_dependencies {
                graph.add_dependency(&project.name, dep, DependencyKind::External)?;
            }
        }

        debug!(
            projects = graph.nodes.len(),
            external = graph.external_nodes.len(),
            "project graph built"
        );
        Ok(graph)
    }

    /// Get a project node
    pub fn get(&self, name: &str) -> Option<&ProjectNode> {
        self.nodes.get(name)
    }

    /// Direct project dependencies (external packages excluded), in name order
    pub fn project_dependencies(&self, name: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .edges_of(name)
            .filter(|e| self.nodes.contains_key(&e.target))
            .map(|e| e.target.as_str())
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Direct external package dependencies, in name order
    pub fn external_dependencies(&self, name: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .edges_of(name)
            .filter(|e| self.external_nodes.contains_key(&e.target))
            .map(|e| e.target.as_str())
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Projects that directly depend on the given project
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.dependencies
            .values()
            .flatten()
            .filter(|e| e.target == name && self.nodes.contains_key(&e.source))
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Project-to-project edges as a plain dependency map
    pub fn project_dependency_map(&self) -> BTreeMap<String, Vec<String>> {
        self.nodes
            .keys()
            .map(|name| {
                let deps = self
                    .project_dependencies(name)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                (name.clone(), deps)
            })
            .collect()
    }

    /// First project dependency cycle, if any
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        graph_utils::find_cycle(&self.project_dependency_map())
    }

    /// Fail when project dependencies are cyclic
    pub fn validate(&self) -> Result<(), ProjectGraphError> {
        match self.find_cycle() {
            Some(cycle) => Err(ProjectGraphError::Cycle(cycle)),
            None => Ok(()),
        }
    }

    fn edges_of<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.dependencies.get(name).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalNodeConfig, ProjectConfig};

    fn project(name: &str, deps: &[&str]) -> ProjectConfig {
        ProjectConfig {
            name: name.to_string(),
            root: format!("libs/{}", name),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_builds_edges() {
        let mut config = Config {
            projects: vec![project("app", &["ui", "utils"]), project("ui", &["utils"]), project("utils", &[])],
            ..Default::default()
        };
        config.external_nodes.insert(
            "npm:react".to_string(),
            ExternalNodeConfig {
                version: "18.2.0".to_string(),
                dependencies: vec![],
            },
        );
        config.projects[1].external_dependencies = vec!["npm:react".to_string()];

        let graph = ProjectGraph::from_config(&config).unwrap();
        assert_eq!(graph.project_dependencies("app"), vec!["ui", "utils"]);
        assert_eq!(graph.external_dependencies("ui"), vec!["npm:react"]);
        assert!(graph.project_dependencies("ui").iter().all(|d| *d != "npm:react"));

        let mut dependents = graph.dependents("utils");
        dependents.sort_unstable();
        assert_eq!(dependents, vec!["app", "ui"]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_from_config_merges_target_defaults() {
        let mut config = Config::default();
        config.target_defaults.insert(
            "build".to_string(),
            TargetConfiguration {
                cache: Some(true),
                outputs: Some(vec!["{projectRoot}/dist".to_string()]),
                ..Default::default()
            },
        );
        let mut app = project("app", &[]);
        app.targets
            .insert("build".to_string(), TargetConfiguration::with_command("make"));
        config.projects.push(app);

        let graph = ProjectGraph::from_config(&config).unwrap();
        let build = &graph.get("app").unwrap().targets["build"];
        assert!(build.is_cacheable());
        assert_eq!(build.command.as_deref(), Some("make"));
        assert_eq!(build.outputs.as_ref().unwrap()[0], "{projectRoot}/dist");
    }

    #[test]
    fn test_project_named_inputs_override_workspace() {
        let mut config = Config::default();
        config
            .named_inputs
            .insert("default".to_string(), vec![InputDefinition::fileset("{projectRoot}/**/*")]);
        let mut app = project("app", &[]);
        app.named_inputs
            .insert("default".to_string(), vec![InputDefinition::fileset("{projectRoot}/src/**")]);
        config.projects.push(app);

        let graph = ProjectGraph::from_config(&config).unwrap();
        assert_eq!(
            graph.get("app").unwrap().named_inputs["default"],
            vec![InputDefinition::fileset("{projectRoot}/src/**")]
        );
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let config = Config {
            projects: vec![project("app", &["missing"])],
            ..Default::default()
        };
        let err = ProjectGraph::from_config(&config).unwrap_err();
        assert!(matches!(err, ProjectGraphError::UnknownProject { .. }));
    }

    #[test]
    fn test_duplicate_project_rejected() {
        let config = Config {
            projects: vec![project("app", &[]), project("app", &[])],
            ..Default::default()
        };
        assert!(matches!(
            ProjectGraph::from_config(&config),
            Err(ProjectGraphError::DuplicateProject(_))
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let config = Config {
            projects: vec![project("a", &["b"]), project("b", &["a"])],
            ..Default::default()
        };
        let graph = ProjectGraph::from_config(&config).unwrap();
        assert_eq!(graph.find_cycle(), Some(vec!["a".into(), "b".into(), "a".into()]));
        assert!(matches!(graph.validate(), Err(ProjectGraphError::Cycle(_))));
    }

    #[test]
    fn test_duplicate_edges_are_ignored() {
        let mut graph = ProjectGraph::new();
        graph.add_project(ProjectNode::new("a", "a"));
        graph.add_project(ProjectNode::new("b", "b"));
        graph.add_dependency("a", "b", DependencyKind::Static).unwrap();
        graph.add_dependency("a", "b", DependencyKind::Implicit).unwrap();
        assert_eq!(graph.dependencies["a"].len(), 1);
    }
}
