//! Task execution reporting

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::orchestrator::TaskStatus;

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// The run is starting
    RunStarted { task_count: usize, parallel: usize },
    /// A task is starting execution
    Started { id: String, command: String },
    /// Several tasks are handed to one executor invocation
    BatchStarted { executor: String, tasks: Vec<String> },
    /// A task produced output
    Output {
        id: String,
        line: String,
        is_stderr: bool,
    },
    /// A task reached a terminal state: it ran, failed, or came from the cache
    Completed {
        id: String,
        status: TaskStatus,
        duration: Duration,
        terminal_output: String,
    },
    /// A task was not run
    Skipped { id: String, reason: String },
    /// All tasks completed
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::RunStarted { task_count, parallel } => {
                tracing::info!(task_count, parallel, "run started");
            }
            TaskEvent::Started { id, command } => {
                tracing::info!("Starting {}: {}", id, command);
            }
            TaskEvent::BatchStarted { executor, tasks } => {
                tracing::info!("Starting batch of {} tasks with {}", tasks.len(), executor);
            }
            TaskEvent::Output { id, line, is_stderr } => {
                if *is_stderr {
                    tracing::warn!("[{}] {}", id, line);
                } else {
                    tracing::debug!("[{}] {}", id, line);
                }
            }
            TaskEvent::Completed {
                id,
                status,
                duration,
                ..
            } => match status {
                TaskStatus::Failure => {
                    tracing::error!("{} failed after {:.1}s", id, duration.as_secs_f64());
                }
                TaskStatus::LocalCacheHit | TaskStatus::RemoteCacheHit => {
                    tracing::info!("{} completed ({})", id, status);
                }
                _ => {
                    tracing::info!("{} completed in {:.1}s", id, duration.as_secs_f64());
                }
            },
            TaskEvent::Skipped { id, reason } => {
                tracing::info!("{} skipped: {}", id, reason);
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} failed, {} cached, {} not run ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cached,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ids of tasks that emitted a `Started` event, in order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Started { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Registry of task reporters
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter the caller keeps a handle to
    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
