//! Ready-set tracking over the task graph
//!
//! The schedule is a synchronous state machine owned by the orchestrator's
//! control loop: it hands out tasks (or batches) whose dependencies are all
//! complete and learns about completions through [`TasksSchedule::complete`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use gantry_core::graph_utils;

use crate::task_graph::TaskGraph;

/// Connected tasks run by a single invocation of a batch-capable executor
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Executor running the batch
    pub executor: String,
    /// The batched tasks with the edges between them
    pub task_graph: TaskGraph,
}

impl Batch {
    /// Ids of the batched tasks
    pub fn task_ids(&self) -> Vec<String> {
        self.task_graph.tasks.keys().cloned().collect()
    }
}

/// Tracks which tasks are waiting, ready, or done
#[derive(Debug)]
pub struct TasksSchedule {
    graph: TaskGraph,
    /// Waiting tasks and their dependencies
    not_scheduled: BTreeMap<String, Vec<String>>,
    reverse: BTreeMap<String, Vec<String>>,
    completed: HashSet<String>,
    scheduled_tasks: VecDeque<String>,
    scheduled_batches: VecDeque<Batch>,
    /// Transitive dependent count per task, the ordering heuristic
    priority: HashMap<String, usize>,
    batch_executors: HashSet<String>,
    batch_enabled: bool,
}

impl TasksSchedule {
    /// Create a schedule. Tasks whose executor is in `batch_executors` are
    /// grouped into batches when `batch_enabled` is set.
    pub fn new(task_graph: &TaskGraph, batch_executors: HashSet<String>, batch_enabled: bool) -> Self {
        let not_scheduled: BTreeMap<String, Vec<String>> = task_graph
            .tasks
            .keys()
            .map(|id| (id.clone(), task_graph.dependencies_of(id).to_vec()))
            .collect();
        let reverse = graph_utils::reverse_dependencies(&not_scheduled);
        let priority = not_scheduled
            .keys()
            .map(|id| (id.clone(), graph_utils::transitive_dependencies(&reverse, id).len()))
            .collect();

        Self {
            graph: task_graph.clone(),
            not_scheduled,
            reverse,
            completed: HashSet::new(),
            scheduled_tasks: VecDeque::new(),
            scheduled_batches: VecDeque::new(),
            priority,
            batch_executors,
            batch_enabled,
        }
    }

    /// Move every waiting task whose dependencies are complete into the
    /// ready queues
    pub fn schedule_next_tasks(&mut self) {
        if self.batch_enabled && !self.batch_executors.is_empty() {
            self.schedule_batches();
        }

        let mut ready: Vec<String> = self
            .not_scheduled
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| self.completed.contains(d)))
            .map(|(id, _)| id.clone())
            .collect();
        if ready.is_empty() {
            return;
        }

        for id in &ready {
            self.not_scheduled.remove(id);
        }
        ready.extend(self.scheduled_tasks.drain(..));
        ready.sort_by(|a, b| self.priority_of(b).cmp(&self.priority_of(a)).then_with(|| a.cmp(b)));
        debug!(ready = ready.len(), waiting = self.not_scheduled.len(), "tasks scheduled");
        self.scheduled_tasks = ready.into();
    }

    fn priority_of(&self, id: &str) -> usize {
        self.priority.get(id).copied().unwrap_or(0)
    }

    fn executor_of(&self, id: &str) -> Option<&str> {
        self.graph.get(id).map(|t| t.executor.as_str())
    }

    fn schedule_batches(&mut self) {
        let roots: Vec<String> = self
            .not_scheduled
            .iter()
            .filter(|(_, deps)| deps.iter().all(|d| self.completed.contains(d)))
            .map(|(id, _)| id.clone())
            .filter(|id| {
                self.executor_of(id)
                    .is_some_and(|e| self.batch_executors.contains(e))
            })
            .collect();

        let mut by_executor: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for root in roots {
            if let Some(executor) = self.executor_of(&root) {
                by_executor.entry(executor.to_string()).or_default().push(root);
            }
        }

        for (executor, roots) in by_executor {
            let members = self.grow_batch(&executor, roots);
            for id in &members {
                self.not_scheduled.remove(id);
            }
            debug!(executor = %executor, tasks = members.len(), "batch scheduled");
            self.scheduled_batches.push_back(Batch {
                executor,
                task_graph: self.graph.subgraph(&members),
            });
        }
    }

    /// Extend a batch from its ready roots along dependents that share the
    /// executor and whose dependencies are done or inside the batch
    fn grow_batch(&self, executor: &str, roots: Vec<String>) -> BTreeSet<String> {
        let mut members: BTreeSet<String> = roots.iter().cloned().collect();
        let mut queue: VecDeque<String> = roots.into();

        while let Some(id) = queue.pop_front() {
            for dependent in self.reverse.get(&id).into_iter().flatten() {
                if members.contains(dependent) || !self.not_scheduled.contains_key(dependent) {
                    continue;
                }
                if self.can_batch_task_be_scheduled(dependent, executor, &members) {
                    members.insert(dependent.clone());
                    queue.push_back(dependent.clone());
                }
            }
        }
        members
    }

    fn can_batch_task_be_scheduled(&self, id: &str, executor: &str, members: &BTreeSet<String>) -> bool {
        self.executor_of(id) == Some(executor)
            && self
                .graph
                .dependencies_of(id)
                .iter()
                .all(|d| self.completed.contains(d) || members.contains(d))
    }

    /// True while any task is waiting or queued
    pub fn has_tasks(&self) -> bool {
        !self.not_scheduled.is_empty()
            || !self.scheduled_tasks.is_empty()
            || !self.scheduled_batches.is_empty()
    }

    /// Pop the next ready task
    pub fn next_task(&mut self) -> Option<String> {
        self.scheduled_tasks.pop_front()
    }

    /// Pop the next ready batch
    pub fn next_batch(&mut self) -> Option<Batch> {
        self.scheduled_batches.pop_front()
    }

    /// Mark tasks as done. Tasks that never ran (skipped) are also dropped
    /// from the waiting set.
    pub fn complete(&mut self, ids: &[String]) {
        for id in ids {
            self.not_scheduled.remove(id);
            self.scheduled_tasks.retain(|t| t != id);
            self.completed.insert(id.clone());
        }
    }

    /// Whether a task has been marked complete
    pub fn is_complete(&self, id: &str) -> bool {
        self.completed.contains(id)
    }

    /// Drop every waiting and queued task, returning their ids
    pub fn remove_unscheduled(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = std::mem::take(&mut self.not_scheduled).into_keys().collect();
        ids.extend(self.scheduled_tasks.drain(..));
        for batch in self.scheduled_batches.drain(..) {
            ids.extend(batch.task_ids());
        }
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskTarget};

    fn graph(edges: &[(&str, &[&str])]) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for (id, deps) in edges {
            let target = TaskTarget::parse(id).unwrap();
            graph.add_task(Task::new(target, "."));
            for dep in *deps {
                graph.add_dependency(id, dep);
            }
        }
        graph.refresh_roots();
        graph
    }

    fn drain(schedule: &mut TasksSchedule) -> Vec<String> {
        std::iter::from_fn(|| schedule.next_task()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dependencies_gate_scheduling() {
        let graph = graph(&[("a:build", &[]), ("b:build", &["a:build"]), ("c:build", &["a:build"])]);
        let mut schedule = TasksSchedule::new(&graph, HashSet::new(), false);

        schedule.schedule_next_tasks();
        assert_eq!(drain(&mut schedule), vec!["a:build"]);
        schedule.schedule_next_tasks();
        assert!(schedule.next_task().is_none());
        assert!(schedule.has_tasks());

        schedule.complete(&strings(&["a:build"]));
        schedule.schedule_next_tasks();
        assert_eq!(drain(&mut schedule), vec!["b:build", "c:build"]);
        assert!(!schedule.has_tasks());
    }

    #[test]
    fn test_more_dependents_first() {
        let graph = graph(&[
            ("a:build", &[]),
            ("z:build", &[]),
            ("y:build", &["z:build"]),
            ("x:build", &["y:build"]),
        ]);
        let mut schedule = TasksSchedule::new(&graph, HashSet::new(), false);
        schedule.schedule_next_tasks();
        assert_eq!(drain(&mut schedule), vec!["z:build", "a:build"]);
    }

    #[test]
    fn test_complete_skipped_tasks_removes_them() {
        let graph = graph(&[("a:build", &[]), ("b:build", &["a:build"]), ("c:build", &["b:build"])]);
        let mut schedule = TasksSchedule::new(&graph, HashSet::new(), false);
        schedule.schedule_next_tasks();
        schedule.next_task();

        schedule.complete(&strings(&["a:build", "b:build", "c:build"]));
        schedule.schedule_next_tasks();
        assert!(schedule.next_task().is_none());
        assert!(!schedule.has_tasks());
        assert!(schedule.is_complete("c:build"));
    }

    #[test]
    fn test_remove_unscheduled() {
        let graph = graph(&[("a:build", &[]), ("b:build", &["a:build"]), ("c:build", &[])]);
        let mut schedule = TasksSchedule::new(&graph, HashSet::new(), false);
        schedule.schedule_next_tasks();
        assert_eq!(schedule.next_task().as_deref(), Some("a:build"));

        assert_eq!(schedule.remove_unscheduled(), vec!["b:build", "c:build"]);
        assert!(!schedule.has_tasks());
    }

    fn batch_graph() -> TaskGraph {
        let mut graph = graph(&[
            ("lib:test", &[]),
            ("app:test", &["lib:test"]),
            ("app:lint", &["lib:test"]),
            ("other:test", &[]),
        ]);
        for id in ["lib:test", "app:test", "other:test"] {
            graph.tasks.get_mut(id).unwrap().executor = "jest".to_string();
        }
        graph
    }

    #[test]
    fn test_batches_group_connected_tasks() {
        let graph = batch_graph();
        let mut schedule = TasksSchedule::new(&graph, HashSet::from(["jest".to_string()]), true);
        schedule.schedule_next_tasks();

        let batch = schedule.next_batch().unwrap();
        assert_eq!(batch.executor, "jest");
        assert_eq!(batch.task_ids(), vec!["app:test", "lib:test", "other:test"]);
        assert_eq!(batch.task_graph.dependencies_of("app:test"), &["lib:test".to_string()]);
        assert!(schedule.next_batch().is_none());

        // lint uses another executor and waits for lib:test
        assert!(schedule.next_task().is_none());
        schedule.complete(&batch.task_ids());
        schedule.schedule_next_tasks();
        assert_eq!(drain(&mut schedule), vec!["app:lint"]);
    }

    #[test]
    fn test_batch_waits_for_outside_dependencies() {
        let mut graph = batch_graph();
        graph.tasks.get_mut("lib:test").unwrap().executor = "run-commands".to_string();
        let mut schedule = TasksSchedule::new(&graph, HashSet::from(["jest".to_string()]), true);
        schedule.schedule_next_tasks();

        let batch = schedule.next_batch().unwrap();
        assert_eq!(batch.task_ids(), vec!["other:test"]);
        assert_eq!(drain(&mut schedule), vec!["lib:test"]);

        schedule.complete(&strings(&["lib:test", "other:test"]));
        schedule.schedule_next_tasks();
        assert_eq!(schedule.next_batch().unwrap().task_ids(), vec!["app:test"]);
    }

    #[test]
    fn test_batching_disabled_runs_tasks_singly() {
        let graph = batch_graph();
        let mut schedule = TasksSchedule::new(&graph, HashSet::from(["jest".to_string()]), false);
        schedule.schedule_next_tasks();
        assert!(schedule.next_batch().is_none());
        assert_eq!(drain(&mut schedule), vec!["lib:test", "other:test"]);
    }
}
