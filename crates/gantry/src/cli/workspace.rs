//! Workspace loading shared by commands

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use gantry_core::config::{load_config_or_default, workspace_root, Config};
use gantry_core::ProjectGraph;

/// A loaded workspace: configuration, root and project graph
#[derive(Debug)]
pub struct Workspace {
    /// Directory holding the configuration file
    pub root: PathBuf,
    pub config: Config,
    pub project_graph: ProjectGraph,
}

impl Workspace {
    /// Load the workspace containing the current directory
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("cannot read the current directory")?;
        Self::load_from(&cwd)
    }

    /// Load the workspace containing `dir`
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let (config, config_path) = load_config_or_default(dir)?;
        let root = workspace_root(config_path.as_deref(), dir);
        let project_graph = ProjectGraph::from_config(&config)?;

        if let Some(cycle) = project_graph.find_cycle() {
            warn!(cycle = %cycle.join(" -> "), "project graph has a dependency cycle");
        }
        debug!(
            root = %root.display(),
            projects = project_graph.nodes.len(),
            "workspace loaded"
        );

        Ok(Self {
            root,
            config,
            project_graph,
        })
    }

    /// Resolve a configured path against the workspace root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Project whose root contains `dir`, preferring the deepest root
    pub fn project_for_dir(&self, dir: &Path) -> Option<String> {
        let relative = dir.strip_prefix(&self.root).ok()?;
        self.project_graph
            .nodes
            .values()
            .filter(|p| !p.root.is_empty() && p.root != "." && relative.starts_with(&p.root))
            .max_by_key(|p| p.root.len())
            .map(|p| p.name.clone())
    }
}
