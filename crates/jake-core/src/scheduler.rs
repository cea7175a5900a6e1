//! Parallel Task Scheduler - Dependency-aware parallel execution
//!
//! Features:
//! - One OS thread per worker, blocking on subprocesses
//! - Per-recipe atomic counter of unfinished dependencies
//! - Shared ready-queue (mutex + condvar), pulled by idle workers
//! - A recipe starts the moment its own dependencies are done
//! - Non-preemptive failure handling: running recipes always finish

use crate::error::{ErrorKind, JakeError};
use crate::graph::RecipeGraph;
use crate::recipe::Recipe;
use petgraph::graph::NodeIndex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a failure takes down with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Only the failing recipe's dependents are abandoned
    #[default]
    Branch,
    /// No new recipe starts once any recipe fails
    Halt,
}

/// Why a recipe did not run its commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UpToDate,
    Platform,
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Skipped(SkipReason),
    Failed,
    /// Never started because a dependency failed or the run halted
    Cancelled,
    /// Dry run: would execute
    Planned,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Skipped(_) | TaskStatus::Planned
        )
    }
}

/// What a job reports back for a recipe that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ran,
    Skipped(SkipReason),
}

/// Task result
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub name: String,
    pub status: TaskStatus,
    pub duration: Duration,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl TaskResult {
    pub fn new(name: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            name: name.into(),
            status,
            duration: Duration::ZERO,
            error: None,
            error_kind: None,
        }
    }
}

struct Queue {
    ready: VecDeque<NodeIndex>,
    in_flight: usize,
    halted: bool,
}

/// Parallel task scheduler
#[derive(Debug, Clone)]
pub struct Scheduler {
    concurrency: usize,
    policy: FailurePolicy,
}

impl Scheduler {
    /// Create new scheduler with concurrency limit
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy: FailurePolicy::Branch,
        }
    }

    /// Stop starting new work after the first failure
    pub fn fail_fast(self, enabled: bool) -> Self {
        self.failure_policy(if enabled {
            FailurePolicy::Halt
        } else {
            FailurePolicy::Branch
        })
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `job` for every recipe in `graph`, dependencies first.
    ///
    /// Returns one result per recipe: finished ones in completion order,
    /// then the ones that never started (as `Cancelled`) in build order.
    pub fn execute<F>(&self, graph: &RecipeGraph<'_>, job: F) -> Vec<TaskResult>
    where
        F: Fn(&Recipe) -> Result<Outcome, JakeError> + Sync,
    {
        if graph.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        let order = graph.topological_order();
        let pending: Vec<AtomicUsize> = (0..graph.len())
            .map(|i| AtomicUsize::new(graph.in_degree(NodeIndex::new(i))))
            .collect();
        let queue = Mutex::new(Queue {
            ready: order
                .iter()
                .copied()
                .filter(|idx| graph.in_degree(*idx) == 0)
                .collect(),
            in_flight: 0,
            halted: false,
        });
        let wakeup = Condvar::new();
        let results = Mutex::new(Vec::with_capacity(graph.len()));
        let workers = self.concurrency.min(graph.len());

        debug!(workers, recipes = graph.len(), "scheduler starting");

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    let worker = Worker {
                        graph,
                        pending: &pending,
                        queue: &queue,
                        wakeup: &wakeup,
                        results: &results,
                        policy: self.policy,
                    };
                    worker.run(&job);
                });
            }
        });

        let mut results = results.into_inner().unwrap_or_else(|e| e.into_inner());
        let mut finished = vec![false; graph.len()];
        for result in &results {
            if let Some(idx) = graph.node(&result.name) {
                finished[idx.index()] = true;
            }
        }
        for idx in order {
            if !finished[idx.index()] {
                let mut cancelled = TaskResult::new(&graph.recipe(idx).name, TaskStatus::Cancelled);
                cancelled.error = Some("not started: an earlier recipe failed".into());
                results.push(cancelled);
            }
        }

        info!(
            "Scheduler completed {} tasks in {:?}",
            results.len(),
            start.elapsed()
        );
        results
    }
}

struct Worker<'s, 'g> {
    graph: &'s RecipeGraph<'g>,
    pending: &'s [AtomicUsize],
    queue: &'s Mutex<Queue>,
    wakeup: &'s Condvar,
    results: &'s Mutex<Vec<TaskResult>>,
    policy: FailurePolicy,
}

impl Worker<'_, '_> {
    fn run<F>(&self, job: &F)
    where
        F: Fn(&Recipe) -> Result<Outcome, JakeError> + Sync,
    {
        while let Some(idx) = self.next() {
            let recipe = self.graph.recipe(idx);
            let start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(recipe)));

            let mut result = TaskResult::new(&recipe.name, TaskStatus::Failed);
            result.duration = start.elapsed();
            match outcome {
                Ok(Ok(Outcome::Ran)) => result.status = TaskStatus::Completed,
                Ok(Ok(Outcome::Skipped(reason))) => result.status = TaskStatus::Skipped(reason),
                Ok(Err(e)) => {
                    warn!(recipe = %recipe.name, error = %e, "recipe failed");
                    result.error_kind = Some(e.kind());
                    result.error = Some(e.to_string());
                }
                Err(_) => {
                    warn!(recipe = %recipe.name, "recipe panicked");
                    result.error = Some("recipe panicked".into());
                }
            }

            let succeeded = result.status.is_success();
            let mut unblocked = Vec::new();
            if succeeded {
                for dependent in self.graph.dependents(idx) {
                    if self.pending[dependent.index()].fetch_sub(1, Ordering::AcqRel) == 1 {
                        unblocked.push(dependent);
                    }
                }
            }

            lock(self.results).push(result);

            let mut queue = lock(self.queue);
            queue.in_flight -= 1;
            if !succeeded && self.policy == FailurePolicy::Halt {
                queue.halted = true;
            }
            queue.ready.extend(unblocked);
            self.wakeup.notify_all();
        }
    }

    /// Block until a recipe is ready; `None` once the run is over
    fn next(&self) -> Option<NodeIndex> {
        let mut queue = lock(self.queue);
        loop {
            if queue.halted {
                return None;
            }
            if let Some(idx) = queue.ready.pop_front() {
                queue.in_flight += 1;
                return Some(idx);
            }
            if queue.in_flight == 0 {
                return None;
            }
            queue = self
                .wakeup
                .wait(queue)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
