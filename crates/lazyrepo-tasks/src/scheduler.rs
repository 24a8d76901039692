//! Task scheduler
//!
//! A single cooperative controller drives every task to a terminal status.
//! Workers run concurrently as spawned tasks, but all status mutation
//! happens on the controller: workers hand their result back over a
//! channel, and each completion re-enters the tick that starts whatever
//! became ready.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use lazyrepo_core::Project;

use crate::executor::{run_task, TaskContext, TaskOutcome};
use crate::graph::TaskGraph;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{TaskKey, TaskStatus, UpstreamTask};

/// Environment variable forcing a single worker (used by the test suite)
pub const TEST_MODE_ENV: &str = "LAZYREPO_TEST_MODE";

/// Environment variable forcing two workers regardless of CPU count
pub const FORCE_PARALLEL_ENV: &str = "LAZYREPO_FORCE_PARALLEL";

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrently running tasks
    pub max_concurrent: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// One less than the CPU count (at least one), overridden by the test-mode
/// and force-parallel environment variables
pub fn default_max_concurrent() -> usize {
    if std::env::var_os(TEST_MODE_ENV).is_some() {
        return 1;
    }
    if std::env::var_os(FORCE_PARALLEL_ENV).is_some() {
        return 2;
    }
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cpus.saturating_sub(1).max(1)
}

/// Aggregate result of a run
#[derive(Debug)]
pub struct RunSummary {
    /// Total tasks in the graph
    pub total: usize,
    /// Tasks that executed their command
    pub eager: usize,
    /// Tasks restored from cache
    pub lazy: usize,
    /// Failed tasks, in topological order
    pub failed: Vec<TaskKey>,
    /// Tasks never started because a transitive dependency failed
    pub not_run: Vec<TaskKey>,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl RunSummary {
    /// Successful task count (eager + lazy)
    pub fn succeeded(&self) -> usize {
        self.eager + self.lazy
    }

    /// Whether every task reached success
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Whether every task was served from cache
    pub fn fully_cached(&self) -> bool {
        self.total > 0 && self.lazy == self.total
    }
}

struct Completion {
    key: TaskKey,
    outcome: TaskOutcome,
}

/// Drives a task graph to completion with bounded concurrency
pub struct Scheduler {
    options: SchedulerOptions,
    reporter: Arc<dyn TaskReporter>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(options: SchedulerOptions, reporter: Arc<dyn TaskReporter>) -> Self {
        Self { options, reporter }
    }

    /// Run every task in the graph to a terminal status.
    ///
    /// Dependents of failed tasks never become ready; they are left
    /// `Pending` and reported as not run.
    pub async fn execute(&self, project: &Project, graph: &mut TaskGraph) -> RunSummary {
        let start = Instant::now();

        let mut global_files: Vec<PathBuf> = Vec::new();
        if let Some(lockfile) = project.lockfile() {
            global_files.push(lockfile);
        }
        global_files.extend(project.config_files());

        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let mut running = 0usize;

        loop {
            running += self.tick(project, graph, &global_files, &tx, running);
            if running == 0 {
                break;
            }

            let Some(done) = rx.recv().await else { break };
            self.apply(graph, done);
            running -= 1;
        }

        let summary = self.summarize(graph, start.elapsed());
        self.reporter.report(&TaskEvent::RunCompleted {
            total: summary.total,
            succeeded: summary.succeeded(),
            failed: summary.failed.len(),
            cached: summary.lazy,
            not_run: summary.not_run.len(),
            duration: summary.duration,
        });
        summary
    }

    /// Start ready tasks up to capacity, in the stable topological order.
    ///
    /// A `parallel = false` task is held back while another non-parallel
    /// instance of the same script is running, so at most one such task
    /// per script name starts per tick.
    fn tick(
        &self,
        project: &Project,
        graph: &mut TaskGraph,
        global_files: &[PathBuf],
        tx: &mpsc::UnboundedSender<Completion>,
        running: usize,
    ) -> usize {
        let capacity = self.options.max_concurrent.saturating_sub(running);
        if capacity == 0 {
            return 0;
        }

        let keys: Vec<TaskKey> = graph.order().to_vec();
        let mut started = 0usize;

        for key in keys {
            if started == capacity {
                break;
            }

            let node = match graph.get(&key) {
                Some(node) if node.status == TaskStatus::Pending => node,
                _ => continue,
            };

            let deps_ready = node.deps.iter().all(|dep| {
                graph
                    .get(&dep.key)
                    .map(|d| d.status.is_success())
                    .unwrap_or(false)
            });
            if !deps_ready {
                continue;
            }

            if !node.config.parallel {
                let serialized_peer_running = graph.nodes().values().any(|other| {
                    other.status == TaskStatus::Running
                        && other.script == node.script
                        && !other.config.parallel
                });
                if serialized_peer_running {
                    continue;
                }
            }

            let ctx = self.context_for(project, graph, &key, global_files);
            let node = graph.get_mut(&key).expect("node exists");
            node.status = TaskStatus::Running;
            debug!(task = %key, "task started");

            let reporter = Arc::clone(&self.reporter);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = run_task(&ctx, reporter.as_ref()).await;
                let _ = tx.send(Completion {
                    key: ctx.key.clone(),
                    outcome,
                });
            });
            started += 1;
        }

        started
    }

    /// Snapshot everything the worker needs; dependencies are terminal by
    /// the time a task starts, so their fingerprints and outputs are final.
    fn context_for(
        &self,
        project: &Project,
        graph: &TaskGraph,
        key: &TaskKey,
        global_files: &[PathBuf],
    ) -> TaskContext {
        let node = graph.get(key).expect("node exists");

        let upstreams: Vec<UpstreamTask> = node
            .deps
            .iter()
            .filter_map(|dep| {
                let dep_node = graph.get(&dep.key)?;
                Some(UpstreamTask {
                    key: dep.key.clone(),
                    fingerprint: dep_node.fingerprint.clone().unwrap_or_default(),
                    output_files: dep_node.output_files.clone(),
                    uses_output: dep.uses_output,
                })
            })
            .collect();

        TaskContext {
            key: node.key.clone(),
            root_dir: project.root().to_path_buf(),
            workspace_dir: node.workspace_dir.clone(),
            command: node.command.clone(),
            extra_args: node.extra_args.clone(),
            force: node.force,
            config: node.config.clone(),
            global_files: global_files.to_vec(),
            upstreams,
        }
    }

    fn apply(&self, graph: &mut TaskGraph, done: Completion) {
        if let Some(node) = graph.get_mut(&done.key) {
            debug!(task = %done.key, status = %done.outcome.status, "task finished");
            node.status = done.outcome.status;
            node.fingerprint = done.outcome.fingerprint;
            node.output_files = done.outcome.output_files;
        }
    }

    fn summarize(&self, graph: &TaskGraph, duration: Duration) -> RunSummary {
        let mut eager = 0;
        let mut lazy = 0;
        let mut failed = Vec::new();
        let mut not_run = Vec::new();

        for key in graph.order() {
            match graph.get(key).map(|n| &n.status) {
                Some(TaskStatus::EagerSuccess) => eager += 1,
                Some(TaskStatus::LazySuccess) => lazy += 1,
                Some(TaskStatus::Failure(_)) => failed.push(key.clone()),
                Some(TaskStatus::Pending) => not_run.push(key.clone()),
                _ => {}
            }
        }

        info!(
            total = graph.len(),
            eager, lazy,
            failed = failed.len(),
            not_run = not_run.len(),
            "run complete"
        );
        RunSummary {
            total: graph.len(),
            eager,
            lazy,
            failed,
            not_run,
            duration,
        }
    }
}
