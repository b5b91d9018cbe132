//! Gantry Tasks - task execution engine
//!
//! This crate turns a project graph into a task graph, hashes tasks from
//! their inputs, serves repeat work from a content-addressable cache, and
//! runs the rest in dependency order with bounded parallelism.

pub mod cache;
pub mod executor;
pub mod hasher;
pub mod orchestrator;
pub mod reporter;
pub mod schedule;
pub mod task;
pub mod task_graph;

pub use cache::{CacheStats, CachedResult, DirectoryRemoteCache, PruneStats, RemoteCache, TaskCache};
pub use executor::{ExecutionContext, Executor, ExecutorOutput, ExecutorRegistry, RunCommandsExecutor};
pub use hasher::{FileHasher, HasherOptions, PartialHash, TaskHasher, WorkspaceFileHasher};
pub use orchestrator::{
    run_tasks, RunContext, RunOptions, RunSummary, TaskOrchestrator, TaskResult, TaskStatus,
};
pub use reporter::{TaskEvent, TaskReporter, TaskReporterRegistry};
pub use schedule::{Batch, TasksSchedule};
pub use task::{Task, TaskTarget};
pub use task_graph::TaskGraph;
