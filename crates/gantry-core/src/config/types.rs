//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::project_graph::{InputDefinition, TargetConfiguration};

use super::defaults::{DEFAULT_CACHE_DIRECTORY, DEFAULT_MAX_CACHE_AGE_DAYS, DEFAULT_PARALLEL};

/// Main configuration for a Gantry workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Workspace name
    pub name: Option<String>,

    /// Task runner configuration
    pub tasks: TasksConfig,

    /// Workspace-level named inputs
    pub named_inputs: BTreeMap<String, Vec<InputDefinition>>,

    /// Workspace-root filesets hashed into every task
    pub global_inputs: Vec<String>,

    /// Defaults merged under project targets with the same name
    pub target_defaults: BTreeMap<String, TargetConfiguration>,

    /// Workspace projects
    pub projects: Vec<ProjectConfig>,

    /// Third-party packages referenced by projects
    pub external_nodes: BTreeMap<String, ExternalNodeConfig>,

    /// Shared cache location
    pub remote_cache: Option<RemoteCacheConfig>,
}

/// Task runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Maximum concurrently running tasks (`false` means one)
    pub parallel: Parallelism,

    /// Stop scheduling new tasks after the first failure
    pub bail: bool,

    /// Ignore the cache for lookups and writes
    pub skip_cache: bool,

    /// Cache directory, relative to the workspace root
    pub cache_directory: PathBuf,

    /// How task output is printed
    pub output_style: OutputStyle,

    /// Break task cycles instead of failing
    pub ignore_cycles: bool,

    /// Group tasks of batch-capable executors
    pub batch: bool,

    /// Age after which cache entries are pruned
    pub max_cache_age_days: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            parallel: Parallelism::default(),
            bail: false,
            skip_cache: false,
            cache_directory: PathBuf::from(DEFAULT_CACHE_DIRECTORY),
            output_style: OutputStyle::default(),
            ignore_cycles: false,
            batch: false,
            max_cache_age_days: DEFAULT_MAX_CACHE_AGE_DAYS,
        }
    }
}

/// Parallelism setting, either a task count or a boolean switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parallelism {
    /// `true` uses the default count, `false` runs serially
    Enabled(bool),
    /// Explicit task count
    Count(usize),
}

impl Parallelism {
    /// Effective number of concurrently running tasks
    pub fn resolve(self) -> usize {
        match self {
            Self::Enabled(false) => 1,
            Self::Enabled(true) => DEFAULT_PARALLEL,
            Self::Count(n) => n.max(1),
        }
    }
}

impl Default for Parallelism {
    fn default() -> Self {
        Self::Count(DEFAULT_PARALLEL)
    }
}

impl FromStr for Parallelism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" => Ok(Self::Enabled(true)),
            "false" => Ok(Self::Enabled(false)),
            n => n
                .parse::<usize>()
                .map(Self::Count)
                .map_err(|_| format!("expected a number, `true` or `false`, got '{}'", s)),
        }
    }
}

/// How task output is written to the terminal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputStyle {
    /// Lines are printed as they arrive, prefixed with the task id
    #[default]
    Stream,
    /// Lines are printed as they arrive without a prefix
    StreamWithoutPrefixes,
    /// Output is printed once the task finishes
    Static,
    /// Only output of failed tasks is printed
    Compact,
}

impl OutputStyle {
    /// Style name as written in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::StreamWithoutPrefixes => "stream-without-prefixes",
            Self::Static => "static",
            Self::Compact => "compact",
        }
    }

    /// Whether lines are printed while the task runs
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Stream | Self::StreamWithoutPrefixes)
    }
}

impl fmt::Display for OutputStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Self::Stream),
            "stream-without-prefixes" => Ok(Self::StreamWithoutPrefixes),
            "static" => Ok(Self::Static),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown output style '{}'", other)),
        }
    }
}

/// A workspace project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Root directory relative to the workspace root
    pub root: String,

    /// Projects this project depends on
    pub dependencies: Vec<String>,

    /// Projects this project depends on without a code reference
    pub implicit_dependencies: Vec<String>,

    /// External packages this project uses
    pub external_dependencies: Vec<String>,

    /// Project-level named inputs, overriding workspace definitions
    pub named_inputs: BTreeMap<String, Vec<InputDefinition>>,

    /// Targets by name
    pub targets: BTreeMap<String, TargetConfiguration>,
}

/// An external package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalNodeConfig {
    /// Resolved version
    pub version: String,

    /// Other external packages this one depends on
    pub dependencies: Vec<String>,
}

/// Shared cache directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Directory shared between machines (e.g. a network mount)
    pub directory: PathBuf,

    /// Only read from the shared cache, never write to it
    #[serde(default)]
    pub read_only: bool,
}
