//! Task types

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The (project, target, configuration) triple a task executes
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskTarget {
    /// Project name
    pub project: String,
    /// Target name (e.g., "build", "test", "lint")
    pub target: String,
    /// Named configuration, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
}

impl TaskTarget {
    /// Create a target without a configuration
    pub fn new(project: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            target: target.into(),
            configuration: None,
        }
    }

    /// Set the configuration
    pub fn with_configuration(mut self, configuration: Option<impl Into<String>>) -> Self {
        self.configuration = configuration.map(Into::into);
        self
    }

    /// Parse from "project:target" or "project:target:configuration"
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let project = parts.next().filter(|p| !p.is_empty())?;
        let target = parts.next().filter(|t| !t.is_empty())?;
        let configuration = parts.next().filter(|c| !c.is_empty());
        Some(Self::new(project, target).with_configuration(configuration))
    }

    /// Task id derived from this target
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.configuration {
            Some(configuration) => write!(f, "{}:{}:{}", self.project, self.target, configuration),
            None => write!(f, "{}:{}", self.project, self.target),
        }
    }
}

/// One unit of work in the task graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, `project:target[:configuration]`
    pub id: String,
    /// What this task runs
    pub target: TaskTarget,
    /// Project root relative to the workspace root
    pub project_root: String,
    /// Executor name resolved from the target configuration
    pub executor: String,
    /// Executor options with the configuration overlay applied
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    /// Extra arguments for this invocation only
    #[serde(default)]
    pub overrides: Vec<String>,
    /// Output paths relative to the workspace root, tokens substituted
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Whether results may be read from and written to the cache
    pub cache: bool,
    /// Hash assigned once by the hasher
    #[serde(default)]
    pub hash: Option<String>,
    /// Sub-hashes that fed into `hash`
    #[serde(default)]
    pub hash_details: BTreeMap<String, String>,
    /// When execution (or the cache replay) started
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When execution (or the cache replay) finished
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task for a target with the default executor
    pub fn new(target: TaskTarget, project_root: impl Into<String>) -> Self {
        Self {
            id: target.id(),
            target,
            project_root: project_root.into(),
            executor: gantry_core::project_graph::DEFAULT_EXECUTOR.to_string(),
            options: BTreeMap::new(),
            overrides: Vec::new(),
            outputs: Vec::new(),
            cache: false,
            hash: None,
            hash_details: BTreeMap::new(),
            start_time: None,
            end_time: None,
        }
    }

    /// Set the shell command run by `run-commands`
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.options
            .insert("command".to_string(), Value::String(command.into()));
        self
    }

    /// Set the executor
    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = executor.into();
        self
    }

    /// Mark the task cacheable
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Set outputs
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Assign the hash. A hash is immutable once set; later calls are ignored.
    pub fn assign_hash(&mut self, hash: String, details: BTreeMap<String, String>) -> bool {
        if self.hash.is_some() {
            return false;
        }
        self.hash = Some(hash);
        self.hash_details = details;
        true
    }

    /// String option, if present
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}
