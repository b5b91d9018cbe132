//! Task orchestration
//!
//! A single control loop drives the [`TasksSchedule`]: it hashes ready
//! tasks, serves them from the cache when possible and otherwise hands them
//! to executors, keeping at most `parallel` executions in flight. Completions
//! are fed back into the schedule before the next scheduling decision.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use gantry_core::config::{OutputStyle, TasksConfig};
use gantry_core::graph_utils;
use gantry_core::project_graph::ProjectGraph;

use crate::cache::{OutputsTracker, RemoteCache, TaskCache};
use crate::executor::{
    ExecutionContext, ExecutorError, ExecutorOutput, ExecutorRegistry, CANCELLED_EXIT_CODE,
};
use crate::hasher::{FileHasher, HasherOptions, TaskHasher, WorkspaceFileHasher};
use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};
use crate::schedule::{Batch, TasksSchedule};
use crate::task::Task;
use crate::task_graph::{TaskGraph, TaskGraphError};

/// Terminal state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// The task ran and exited with 0
    Success,
    /// The task ran and failed, or could not be hashed or started
    Failure,
    /// Served from the local cache
    LocalCacheHit,
    /// Served from the remote cache
    RemoteCacheHit,
    /// Not run: a dependency failed, or the run stopped early
    Skipped,
}

impl TaskStatus {
    /// Succeeded or validly cached
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::LocalCacheHit | Self::RemoteCacheHit)
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Self::LocalCacheHit | Self::RemoteCacheHit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::LocalCacheHit => "local cache hit",
            Self::RemoteCacheHit => "remote cache hit",
            Self::Skipped => "not run",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// The task, with hash and timing filled in
    pub task: Task,
    pub status: TaskStatus,
    /// Exit code, when a process ran or a cached run is replayed
    pub code: Option<i32>,
    pub terminal_output: String,
    /// Why the task failed or was not run
    pub error: Option<String>,
}

impl TaskResult {
    /// Time between start and end, zero when the task never started
    pub fn duration(&self) -> Duration {
        match (self.task.start_time, self.task.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Task ids the caller asked for
    pub requested: Vec<String>,
    /// Every task of the graph by id
    pub results: BTreeMap<String, TaskResult>,
    pub duration: Duration,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl RunSummary {
    /// 0 when every task succeeded or was cached, 130 when cancelled,
    /// 1 otherwise. Dry runs always exit 0.
    pub fn exit_code(&self) -> i32 {
        if self.dry_run {
            0
        } else if self.cancelled {
            CANCELLED_EXIT_CODE
        } else if self.results.values().all(|r| r.status.is_success()) {
            0
        } else {
            1
        }
    }

    pub fn get(&self, id: &str) -> Option<&TaskResult> {
        self.results.get(id)
    }

    /// Number of tasks with the given status
    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.status.is_success()).count()
    }

    pub fn cached(&self) -> usize {
        self.results.values().filter(|r| r.status.is_cache_hit()).count()
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::Skipped)
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum concurrent executions, at least 1
    pub parallel: usize,
    /// Stop starting tasks after the first failure
    pub bail: bool,
    /// Neither read nor write the cache
    pub skip_cache: bool,
    /// Cache location, relative paths resolve against the workspace root
    pub cache_directory: PathBuf,
    pub output_style: OutputStyle,
    /// Break dependency cycles instead of failing
    pub ignore_cycles: bool,
    /// Group tasks of batch-capable executors
    pub batch: bool,
    /// Report the plan without running anything
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&TasksConfig::default())
    }
}

impl RunOptions {
    /// Options from the `tasks` section of the workspace configuration
    pub fn from_config(config: &TasksConfig) -> Self {
        Self {
            parallel: config.parallel.resolve(),
            bail: config.bail,
            skip_cache: config.skip_cache,
            cache_directory: config.cache_directory.clone(),
            output_style: config.output_style,
            ignore_cycles: config.ignore_cycles,
            batch: config.batch,
            dry_run: false,
        }
    }
}

/// What a run operates on
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Absolute workspace root
    pub workspace_root: PathBuf,
    pub project_graph: Arc<ProjectGraph>,
    pub task_graph: TaskGraph,
    /// Project the command was invoked from, if any
    pub initiating_project: Option<String>,
    /// Environment used for env inputs and as the child process base
    pub env: BTreeMap<String, String>,
}

/// Run a task graph with the built-in executors
pub async fn run_tasks(
    requested: &[String],
    options: RunOptions,
    context: RunContext,
) -> Result<RunSummary, OrchestratorError> {
    TaskOrchestrator::new(options).run(requested, context).await
}

/// Drives hashing, caching and execution of a task graph
pub struct TaskOrchestrator {
    options: RunOptions,
    executors: ExecutorRegistry,
    reporter: Arc<dyn TaskReporter>,
    file_hasher: Option<Arc<dyn FileHasher>>,
    hasher_options: HasherOptions,
    remote_cache: Option<Arc<dyn RemoteCache>>,
    outputs_tracker: Option<Arc<dyn OutputsTracker>>,
    cancel: Option<watch::Receiver<Option<i32>>>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with the built-in executors and a tracing reporter
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            executors: ExecutorRegistry::new(),
            reporter: Arc::new(TracingReporter),
            file_hasher: None,
            hasher_options: HasherOptions::default(),
            remote_cache: None,
            outputs_tracker: None,
            cancel: None,
        }
    }

    pub fn with_executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_file_hasher(mut self, file_hasher: Arc<dyn FileHasher>) -> Self {
        self.file_hasher = Some(file_hasher);
        self
    }

    pub fn with_hasher_options(mut self, options: HasherOptions) -> Self {
        self.hasher_options = options;
        self
    }

    pub fn with_remote_cache(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote_cache = Some(remote);
        self
    }

    pub fn with_outputs_tracker(mut self, tracker: Arc<dyn OutputsTracker>) -> Self {
        self.outputs_tracker = Some(tracker);
        self
    }

    /// Stop the run when the receiver holds a signal number
    pub fn with_cancellation(mut self, cancel: watch::Receiver<Option<i32>>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn task_cache(&self, workspace_root: &std::path::Path) -> TaskCache {
        let mut cache = TaskCache::new(workspace_root, &self.options.cache_directory);
        if let Some(remote) = &self.remote_cache {
            cache = cache.with_remote(remote.clone());
        }
        if let Some(tracker) = &self.outputs_tracker {
            cache = cache.with_outputs_tracker(tracker.clone());
        }
        cache
    }

    fn default_file_hasher(&self, workspace_root: &std::path::Path) -> Arc<dyn FileHasher> {
        let cache_dir = &self.options.cache_directory;
        let relative = if cache_dir.is_absolute() {
            cache_dir.strip_prefix(workspace_root).ok()
        } else {
            Some(cache_dir.as_path())
        };
        let mut hasher = WorkspaceFileHasher::new();
        if let Some(relative) = relative {
            hasher = hasher.ignoring(relative.to_string_lossy());
        }
        Arc::new(hasher)
    }

    /// Run every task of the context's task graph
    #[instrument(skip_all, fields(tasks = context.task_graph.len(), parallel = self.options.parallel))]
    pub async fn run(&self, requested: &[String], context: RunContext) -> Result<RunSummary, OrchestratorError> {
        let started = Instant::now();
        let RunContext {
            workspace_root,
            project_graph,
            mut task_graph,
            initiating_project,
            env,
        } = context;

        if let Some(cycle) = task_graph.find_cycle() {
            if !self.options.ignore_cycles {
                return Err(TaskGraphError::Cycle(cycle).into());
            }
            let removed = graph_utils::make_acyclic(&mut task_graph);
            warn!(
                cycle = %cycle.join(" -> "),
                removed_edges = removed.len(),
                "ignoring task dependency cycle"
            );
        }

        let parallel = self.options.parallel.max(1);
        info!(
            tasks = task_graph.len(),
            parallel,
            initiating_project = initiating_project.as_deref().unwrap_or("-"),
            output_style = %self.options.output_style,
            "starting run"
        );
        self.reporter.report(&TaskEvent::RunStarted {
            task_count: task_graph.len(),
            parallel,
        });

        if self.options.dry_run {
            return Ok(self.dry_run(requested, &task_graph, started));
        }

        // keeps the fallback channel open for the whole run
        let (_cancel_tx, fallback) = watch::channel(None);
        let cancel = self.cancel.clone().unwrap_or(fallback);

        let file_hasher = self
            .file_hasher
            .clone()
            .unwrap_or_else(|| self.default_file_hasher(&workspace_root));
        let hasher = TaskHasher::new(
            workspace_root.clone(),
            project_graph,
            file_hasher,
            self.hasher_options.clone(),
        );

        let mut run = Run {
            orchestrator: self,
            reverse: graph_utils::reverse_dependencies(&task_graph.dependencies),
            tasks: task_graph.tasks.clone(),
            schedule: TasksSchedule::new(&task_graph, self.executors.batch_executors(), self.options.batch),
            graph: Arc::new(task_graph),
            hasher: Arc::new(hasher),
            cache: Arc::new(self.task_cache(&workspace_root)),
            env: Arc::new(env.clone()),
            ctx: ExecutionContext {
                workspace_root,
                env,
                reporter: self.reporter.clone(),
                cancel: cancel.clone(),
            },
            results: BTreeMap::new(),
            running_hashes: HashMap::new(),
            parked: HashMap::new(),
            retry: VecDeque::new(),
            join_set: JoinSet::new(),
            parallel,
        };

        let cancelled = run.drive(cancel).await?;
        let summary = RunSummary {
            requested: requested.to_vec(),
            results: run.results,
            duration: started.elapsed(),
            cancelled,
            dry_run: false,
        };

        self.reporter.report(&TaskEvent::AllCompleted {
            total: summary.results.len(),
            succeeded: summary.succeeded(),
            failed: summary.failed(),
            cached: summary.cached(),
            skipped: summary.skipped(),
            duration: summary.duration,
        });
        info!(
            exit_code = summary.exit_code(),
            duration_ms = summary.duration.as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    fn dry_run(&self, requested: &[String], graph: &TaskGraph, started: Instant) -> RunSummary {
        let mut results = BTreeMap::new();
        for id in graph_utils::topological_order(&graph.dependencies) {
            let Some(task) = graph.get(&id) else {
                continue;
            };
            self.reporter.report(&TaskEvent::Skipped {
                id: id.clone(),
                reason: "dry run".to_string(),
            });
            results.insert(
                id,
                TaskResult {
                    task: task.clone(),
                    status: TaskStatus::Skipped,
                    code: None,
                    terminal_output: String::new(),
                    error: Some("dry run".to_string()),
                },
            );
        }

        RunSummary {
            requested: requested.to_vec(),
            results,
            duration: started.elapsed(),
            cancelled: false,
            dry_run: true,
        }
    }
}

/// A finished unit of work coming back from the join set
enum Completion {
    Task {
        task: Box<Task>,
        outcome: Result<ExecutorOutput, ExecutorError>,
    },
    Batch {
        tasks: Vec<Task>,
        outcome: Result<BTreeMap<String, ExecutorOutput>, ExecutorError>,
    },
    Panicked {
        ids: Vec<String>,
        message: String,
    },
}

/// How starting a task went
enum Start {
    /// A result is already recorded (cache hit or failure before running)
    Done,
    /// Waiting for a running task with the same hash
    Parked,
    /// Handed to an executor
    Spawned,
}

/// Mutable state of one run, owned by the control loop
struct Run<'a> {
    orchestrator: &'a TaskOrchestrator,
    graph: Arc<TaskGraph>,
    reverse: BTreeMap<String, Vec<String>>,
    tasks: BTreeMap<String, Task>,
    schedule: TasksSchedule,
    hasher: Arc<TaskHasher>,
    cache: Arc<TaskCache>,
    env: Arc<BTreeMap<String, String>>,
    ctx: ExecutionContext,
    results: BTreeMap<String, TaskResult>,
    /// Hash to the id of the task currently computing it
    running_hashes: HashMap<String, String>,
    /// Hash to tasks waiting for it
    parked: HashMap<String, Vec<String>>,
    /// Parked tasks released for another attempt
    retry: VecDeque<String>,
    join_set: JoinSet<Completion>,
    parallel: usize,
}

impl Run<'_> {
    fn options(&self) -> &RunOptions {
        &self.orchestrator.options
    }

    fn report(&self, event: TaskEvent) {
        self.orchestrator.reporter.report(&event);
    }

    /// Returns whether the run was cancelled
    async fn drive(&mut self, mut cancel: watch::Receiver<Option<i32>>) -> Result<bool, OrchestratorError> {
        let mut cancel_open = true;
        let mut cancelled = cancel.borrow().is_some();
        let mut bailing = false;

        loop {
            if !cancelled && !bailing {
                let mut progressed = false;
                self.schedule.schedule_next_tasks();

                while self.join_set.len() < self.parallel {
                    if let Some(batch) = self.schedule.next_batch() {
                        self.start_batch(batch).await;
                        progressed = true;
                        continue;
                    }
                    let Some(id) = self.retry.pop_front().or_else(|| self.schedule.next_task()) else {
                        break;
                    };
                    match self.start_task(&id).await {
                        Start::Done => progressed = true,
                        Start::Parked | Start::Spawned => {}
                    }
                    if self.options().bail && self.has_failure() {
                        bailing = true;
                        break;
                    }
                }

                if progressed && !bailing {
                    continue;
                }
            }

            if self.join_set.is_empty() {
                if cancelled || bailing {
                    let reason = if cancelled { "run cancelled" } else { "stopped after a failure" };
                    self.skip_remaining(reason);
                    break;
                }
                if !self.schedule.has_tasks() && self.retry.is_empty() && self.parked.is_empty() {
                    break;
                }
                let remaining: Vec<String> = self
                    .tasks
                    .keys()
                    .filter(|id| !self.results.contains_key(*id))
                    .cloned()
                    .collect();
                return Err(OrchestratorError::Deadlock(remaining));
            }

            tokio::select! {
                Some(joined) = self.join_set.join_next() => {
                    let completion = joined.unwrap_or_else(|e| Completion::Panicked {
                        ids: Vec::new(),
                        message: e.to_string(),
                    });
                    self.finish(completion).await;
                    if self.options().bail && self.has_failure() {
                        bailing = true;
                    }
                }
                changed = cancel.changed(), if cancel_open => match changed {
                    Ok(()) => {
                        if let Some(signal) = *cancel.borrow() {
                            warn!(signal, in_flight = self.join_set.len(), "cancelling run");
                            cancelled = true;
                        }
                    }
                    Err(_) => cancel_open = false,
                },
            }
        }

        Ok(cancelled)
    }

    fn has_failure(&self) -> bool {
        self.results.values().any(|r| r.status == TaskStatus::Failure)
    }

    fn cache_enabled(&self, task: &Task) -> bool {
        task.cache && !self.options().skip_cache
    }

    /// Hash a task unless it already has a hash
    async fn ensure_hash(&mut self, id: &str) -> Result<(), String> {
        let Some(task) = self.tasks.get(id) else {
            return Err(format!("unknown task '{}'", id));
        };
        if task.hash.is_some() {
            return Ok(());
        }

        let task = task.clone();
        let hasher = self.hasher.clone();
        let graph = self.graph.clone();
        let env = self.env.clone();
        let hashed = tokio::task::spawn_blocking(move || hasher.hash_task(&task, &graph, &env, &[]))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| format!("Failed to hash task: {}", e))?;

        if let Some(task) = self.tasks.get_mut(id) {
            debug!(task = id, hash = %hashed.value, "hash assigned");
            task.assign_hash(hashed.value, hashed.details);
        }
        Ok(())
    }

    /// Serve a task from the cache. Returns false on a miss.
    async fn try_cache(&mut self, id: &str) -> bool {
        let Some(task) = self.tasks.get(id).cloned() else {
            return false;
        };
        let Some(hash) = task.hash.clone() else {
            return false;
        };

        let cache = self.cache.clone();
        let lookup = tokio::task::spawn_blocking(move || {
            let cached = cache.get(&task)?;
            if let Some(cached) = &cached {
                cache.copy_files_from_cache(&hash, cached, &task.outputs)?;
            }
            Ok::<_, crate::cache::CacheError>(cached)
        })
        .await;

        let cached = match lookup {
            Ok(Ok(Some(cached))) => cached,
            Ok(Ok(None)) => return false,
            Ok(Err(e)) => {
                warn!(task = id, error = %e, "cache lookup failed, running task");
                return false;
            }
            Err(e) => {
                warn!(task = id, error = %e, "cache lookup panicked, running task");
                return false;
            }
        };

        let now = Utc::now();
        if let Some(task) = self.tasks.get_mut(id) {
            task.start_time = Some(now);
            task.end_time = Some(now);
        }
        let status = if cached.remote {
            TaskStatus::RemoteCacheHit
        } else {
            TaskStatus::LocalCacheHit
        };
        debug!(task = id, %status, "served from cache");
        self.record(id, status, Some(cached.code), cached.terminal_output, None);
        true
    }

    async fn start_task(&mut self, id: &str) -> Start {
        if let Err(error) = self.ensure_hash(id).await {
            warn!(task = id, %error, "hashing failed");
            self.record(id, TaskStatus::Failure, None, String::new(), Some(error));
            return Start::Done;
        }

        let Some(task) = self.tasks.get(id).cloned() else {
            return Start::Done;
        };
        let hash = task.hash.clone().unwrap_or_default();

        if self.cache_enabled(&task) {
            if let Some(owner) = self.running_hashes.get(&hash) {
                debug!(task = id, owner = %owner, "same hash already running, waiting");
                self.parked.entry(hash).or_default().push(id.to_string());
                return Start::Parked;
            }
            if self.try_cache(id).await {
                return Start::Done;
            }
        }

        let Some(executor) = self.orchestrator.executors.get(&task.executor) else {
            let error = ExecutorError::UnknownExecutor(task.executor.clone()).to_string();
            self.record(id, TaskStatus::Failure, None, String::new(), Some(error));
            return Start::Done;
        };

        if self.cache_enabled(&task) {
            self.running_hashes.insert(hash, id.to_string());
        }

        let mut task = task;
        task.start_time = Some(Utc::now());
        if let Some(stored) = self.tasks.get_mut(id) {
            stored.start_time = task.start_time;
        }

        let command = task
            .option_str("command")
            .map(str::to_string)
            .unwrap_or_else(|| format!("<{}>", task.executor));
        self.report(TaskEvent::Started {
            id: id.to_string(),
            command,
        });

        let ctx = self.ctx.clone();
        let ids = vec![id.to_string()];
        self.join_set.spawn(isolate(ids, async move {
            let outcome = executor.run(&task, &ctx).await;
            task.end_time = Some(Utc::now());
            Completion::Task {
                task: Box::new(task),
                outcome,
            }
        }));
        Start::Spawned
    }

    /// Whether a batch member must wait for the batch to finish before it
    /// can be hashed: it reads outputs of a member that is about to run, or
    /// depends on a member that waits
    fn hash_after_batch(
        &self,
        id: &str,
        batch: &Batch,
        pending: &BTreeSet<String>,
        deferred: &BTreeSet<String>,
    ) -> bool {
        let running: Vec<&String> = batch
            .task_graph
            .dependencies_of(id)
            .iter()
            .filter(|dep| pending.contains(*dep))
            .collect();
        if running.is_empty() {
            return false;
        }
        running.iter().any(|dep| deferred.contains(*dep))
            || self
                .tasks
                .get(id)
                .is_some_and(|task| self.hasher.reads_dependency_outputs(task))
    }

    async fn start_batch(&mut self, batch: Batch) {
        let mut pending = BTreeSet::new();
        let mut deferred = BTreeSet::new();
        for id in graph_utils::topological_order(&batch.task_graph.dependencies) {
            if self.results.contains_key(&id) {
                continue;
            }
            if self.hash_after_batch(&id, &batch, &pending, &deferred) {
                debug!(task = %id, "hashing after the batch runs");
                deferred.insert(id.clone());
                pending.insert(id);
                continue;
            }
            if let Err(error) = self.ensure_hash(&id).await {
                self.record(&id, TaskStatus::Failure, None, String::new(), Some(error));
                continue;
            }
            let cacheable = self.tasks.get(&id).is_some_and(|t| self.cache_enabled(t));
            if cacheable && self.try_cache(&id).await {
                continue;
            }
            pending.insert(id);
        }

        let pending: BTreeSet<String> = pending
            .into_iter()
            .filter(|id| !self.results.contains_key(id))
            .collect();
        if pending.is_empty() {
            return;
        }

        let Some(executor) = self.orchestrator.executors.get(&batch.executor) else {
            let error = ExecutorError::UnknownExecutor(batch.executor.clone()).to_string();
            for id in &pending {
                self.record(id, TaskStatus::Failure, None, String::new(), Some(error.clone()));
            }
            return;
        };

        let now = Utc::now();
        let mut batch_graph = self.graph.subgraph(&pending);
        for (id, task) in batch_graph.tasks.iter_mut() {
            if let Some(stored) = self.tasks.get_mut(id) {
                stored.start_time = Some(now);
                *task = stored.clone();
            }
        }

        self.report(TaskEvent::BatchStarted {
            executor: batch.executor.clone(),
            tasks: pending.iter().cloned().collect(),
        });

        let batch = Batch {
            executor: batch.executor,
            task_graph: batch_graph,
        };
        let ctx = self.ctx.clone();
        let ids: Vec<String> = pending.into_iter().collect();
        self.join_set.spawn(isolate(ids, async move {
            let outcome = executor.run_batch(&batch, &ctx).await;
            let end = Utc::now();
            let tasks = batch
                .task_graph
                .tasks
                .into_values()
                .map(|mut task| {
                    task.end_time = Some(end);
                    task
                })
                .collect();
            Completion::Batch { tasks, outcome }
        }));
    }

    async fn finish(&mut self, completion: Completion) {
        match completion {
            Completion::Task { task, outcome } => {
                let id = task.id.clone();
                let hash = task.hash.clone();
                self.tasks.insert(id.clone(), *task);
                self.finish_task(&id, outcome).await;
                if let Some(hash) = hash {
                    self.release_parked(&hash);
                }
            }
            Completion::Batch { tasks, outcome } => {
                let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
                for task in tasks {
                    self.tasks.insert(task.id.clone(), task);
                }
                let ordered: Vec<String> = graph_utils::topological_order(&self.graph.dependencies)
                    .into_iter()
                    .filter(|id| ids.contains(id))
                    .collect();

                match outcome {
                    Ok(mut outputs) => {
                        for id in &ordered {
                            if self.results.contains_key(id) {
                                continue;
                            }
                            let Some(output) = outputs.remove(id) else {
                                continue;
                            };
                            // members deferred by start_batch get their hash now
                            if output.success() {
                                if let Err(error) = self.ensure_hash(id).await {
                                    self.record(
                                        id,
                                        TaskStatus::Failure,
                                        Some(output.code),
                                        output.terminal_output,
                                        Some(error),
                                    );
                                    continue;
                                }
                            }
                            self.finish_task(id, Ok(output)).await;
                        }
                        for id in &ordered {
                            if !self.results.contains_key(id) {
                                let error = "batch executor returned no result".to_string();
                                self.record(id, TaskStatus::Failure, None, String::new(), Some(error));
                            }
                        }
                    }
                    Err(e) => {
                        for id in &ordered {
                            if !self.results.contains_key(id) {
                                self.record(id, TaskStatus::Failure, None, String::new(), Some(e.to_string()));
                            }
                        }
                    }
                }
            }
            Completion::Panicked { ids, message } => {
                warn!(tasks = ?ids, %message, "task execution panicked");
                for id in ids {
                    if !self.results.contains_key(&id) {
                        self.record(&id, TaskStatus::Failure, None, String::new(), Some(message.clone()));
                    }
                }
            }
        }
    }

    async fn finish_task(&mut self, id: &str, outcome: Result<ExecutorOutput, ExecutorError>) {
        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                self.record(id, TaskStatus::Failure, None, String::new(), Some(e.to_string()));
                return;
            }
        };

        if !output.success() {
            let error = format!("exited with code {}", output.code);
            self.record(id, TaskStatus::Failure, Some(output.code), output.terminal_output, Some(error));
            return;
        }

        let cacheable = self.tasks.get(id).filter(|t| self.cache_enabled(t)).cloned();
        if let Some(task) = cacheable {
            let cache = self.cache.clone();
            let terminal_output = output.terminal_output.clone();
            let stored = tokio::task::spawn_blocking(move || {
                cache.put(&task, &terminal_output, &task.outputs, 0)
            })
            .await;
            match stored {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = id, error = %e, "failed to write cache entry"),
                Err(e) => warn!(task = id, error = %e, "cache write panicked"),
            }
        }

        self.record(id, TaskStatus::Success, Some(output.code), output.terminal_output, None);
    }

    /// Tasks waiting on a hash get another attempt; after a success they
    /// are served from the cache
    fn release_parked(&mut self, hash: &str) {
        self.running_hashes.remove(hash);
        if let Some(waiting) = self.parked.remove(hash) {
            debug!(hash, waiting = waiting.len(), "releasing tasks with the same hash");
            self.retry.extend(waiting);
        }
    }

    /// Store a terminal result, tell the schedule and reporters, and mark
    /// dependents of a failure as not run
    fn record(
        &mut self,
        id: &str,
        status: TaskStatus,
        code: Option<i32>,
        terminal_output: String,
        error: Option<String>,
    ) {
        let Some(task) = self.tasks.get(id).cloned() else {
            return;
        };
        let result = TaskResult {
            task,
            status,
            code,
            terminal_output,
            error,
        };

        if status == TaskStatus::Skipped {
            self.report(TaskEvent::Skipped {
                id: id.to_string(),
                reason: result.error.clone().unwrap_or_default(),
            });
        } else {
            self.report(TaskEvent::Completed {
                id: id.to_string(),
                status,
                duration: result.duration(),
                terminal_output: result.terminal_output.clone(),
            });
        }

        self.results.insert(id.to_string(), result);
        self.schedule.complete(&[id.to_string()]);

        if matches!(status, TaskStatus::Failure | TaskStatus::Skipped) {
            self.skip_dependents(id);
        }
    }

    fn skip_dependents(&mut self, failed: &str) {
        let mut queue: VecDeque<String> = VecDeque::from([failed.to_string()]);
        while let Some(current) = queue.pop_front() {
            let dependents = self.reverse.get(&current).cloned().unwrap_or_default();
            for dependent in dependents {
                if self.results.contains_key(&dependent) {
                    continue;
                }
                let Some(task) = self.tasks.get(&dependent).cloned() else {
                    continue;
                };
                let reason = format!("dependency {} did not complete", current);
                self.report(TaskEvent::Skipped {
                    id: dependent.clone(),
                    reason: reason.clone(),
                });
                self.results.insert(
                    dependent.clone(),
                    TaskResult {
                        task,
                        status: TaskStatus::Skipped,
                        code: None,
                        terminal_output: String::new(),
                        error: Some(reason),
                    },
                );
                self.schedule.complete(&[dependent.clone()]);
                queue.push_back(dependent);
            }
        }
    }

    /// Mark every task without a result as not run
    fn skip_remaining(&mut self, reason: &str) {
        self.schedule.remove_unscheduled();
        self.retry.clear();
        self.parked.clear();

        let remaining: Vec<String> = self
            .tasks
            .keys()
            .filter(|id| !self.results.contains_key(*id))
            .cloned()
            .collect();
        for id in remaining {
            self.record(&id, TaskStatus::Skipped, None, String::new(), Some(reason.to_string()));
        }
    }
}

/// Run the work in its own task so a panic becomes a failure of the tasks
/// involved instead of a lost completion
async fn isolate<F>(ids: Vec<String>, work: F) -> Completion
where
    F: std::future::Future<Output = Completion> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(completion) => completion,
        Err(e) => Completion::Panicked {
            ids,
            message: e.to_string(),
        },
    }
}

/// Errors that abort a whole run
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The task graph is unusable
    #[error(transparent)]
    Graph(#[from] TaskGraphError),

    /// Tasks remain but none can start and none are running
    #[error("No task can be scheduled, {} remaining: {}", .0.len(), .0.join(", "))]
    Deadlock(Vec<String>),
}
