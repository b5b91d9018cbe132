//! Executors run tasks
//!
//! The orchestrator only knows the [`Executor`] trait; which executor runs a
//! task is decided by the task's `executor` name, looked up in an
//! [`ExecutorRegistry`].

mod run_commands;
pub mod signals;

pub use run_commands::{RunCommandsExecutor, CANCELLED_EXIT_CODE};

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use gantry_core::graph_utils;

use crate::reporter::TaskReporter;
use crate::schedule::Batch;
use crate::task::Task;

/// Result of running one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOutput {
    /// Process exit code, 0 on success
    pub code: i32,
    /// Captured stdout and stderr, interleaved in arrival order
    pub terminal_output: String,
}

impl ExecutorOutput {
    pub fn new(code: i32, terminal_output: impl Into<String>) -> Self {
        Self {
            code,
            terminal_output: terminal_output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Everything an executor needs besides the task itself
#[derive(Clone)]
pub struct ExecutionContext {
    /// Absolute workspace root
    pub workspace_root: PathBuf,
    /// Base environment for child processes
    pub env: BTreeMap<String, String>,
    /// Receives output events
    pub reporter: Arc<dyn TaskReporter>,
    /// Holds the signal number once the run is cancelled
    pub cancel: watch::Receiver<Option<i32>>,
}

impl ExecutionContext {
    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.borrow().is_some()
    }
}

/// Runs tasks of one kind
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name targets refer to in their `executor` field
    fn name(&self) -> &str;

    /// Run a single task
    async fn run(&self, task: &Task, ctx: &ExecutionContext) -> Result<ExecutorOutput, ExecutorError>;

    /// Whether connected tasks may be handed over together
    fn supports_batch(&self) -> bool {
        false
    }

    /// Run a batch, returning an output per task that ran.
    ///
    /// The default runs the tasks one by one in dependency order and leaves
    /// out any task whose batch dependency did not succeed.
    async fn run_batch(
        &self,
        batch: &Batch,
        ctx: &ExecutionContext,
    ) -> Result<BTreeMap<String, ExecutorOutput>, ExecutorError> {
        let graph = &batch.task_graph;
        let mut outputs: BTreeMap<String, ExecutorOutput> = BTreeMap::new();

        for id in graph_utils::topological_order(&graph.dependencies) {
            if ctx.is_cancelled() {
                break;
            }
            let Some(task) = graph.get(&id) else {
                continue;
            };
            let deps_ok = graph
                .dependencies_of(&id)
                .iter()
                .all(|d| outputs.get(d).is_some_and(ExecutorOutput::success));
            if !deps_ok {
                continue;
            }

            let output = match self.run(task, ctx).await {
                Ok(output) => output,
                Err(e) => ExecutorOutput::new(1, e.to_string()),
            };
            outputs.insert(id, output);
        }

        Ok(outputs)
    }
}

/// Registry of available executors
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create a registry with the built-in executors
    pub fn new() -> Self {
        Self {
            executors: vec![Arc::new(RunCommandsExecutor)],
        }
    }

    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    /// Register an executor. A later registration shadows an earlier one
    /// with the same name.
    pub fn register<E: Executor + 'static>(&mut self, executor: E) {
        self.register_shared(Arc::new(executor));
    }

    /// Register an executor the caller keeps a handle to
    pub fn register_shared(&mut self, executor: Arc<dyn Executor>) {
        self.executors.retain(|e| e.name() != executor.name());
        self.executors.push(executor);
    }

    /// Get executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.iter().find(|e| e.name() == name).cloned()
    }

    /// Get executor names
    pub fn names(&self) -> Vec<&str> {
        self.executors.iter().map(|e| e.name()).collect()
    }

    /// Names of executors that accept batches
    pub fn batch_executors(&self) -> HashSet<String> {
        self.executors
            .iter()
            .filter(|e| e.supports_batch())
            .map(|e| e.name().to_string())
            .collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment for a task's child process: the base environment plus the
/// task's identity, hash and `env` option
pub fn task_env(base: &BTreeMap<String, String>, task: &Task) -> BTreeMap<String, String> {
    let mut env = base.clone();
    env.insert("GANTRY_TASK_TARGET_PROJECT".into(), task.target.project.clone());
    env.insert("GANTRY_TASK_TARGET_TARGET".into(), task.target.target.clone());
    match &task.target.configuration {
        Some(configuration) => {
            env.insert("GANTRY_TASK_TARGET_CONFIGURATION".into(), configuration.clone());
        }
        None => {
            env.remove("GANTRY_TASK_TARGET_CONFIGURATION");
        }
    }
    if let Some(hash) = &task.hash {
        env.insert("GANTRY_TASK_HASH".into(), hash.clone());
    }

    if let Some(Value::Object(vars)) = task.options.get("env") {
        for (key, value) in vars {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env.insert(key.clone(), value);
        }
    }
    env
}

/// Executor errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// No executor is registered under the name
    #[error("No executor named '{0}' is registered")]
    UnknownExecutor(String),

    /// The task has nothing to run
    #[error("Task '{0}' has no command to run")]
    MissingCommand(String),

    /// The child process could not be started
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child process failed
    #[error("IO error while running task: {0}")]
    Io(#[from] std::io::Error),
}
