//! Task execution reporting

use std::time::Duration;

use crate::task::TaskKey;

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task is starting execution
    Started { key: TaskKey, command: String },
    /// A task produced a line of output
    Output {
        key: TaskKey,
        line: String,
        is_stderr: bool,
    },
    /// A task completed successfully; `cached` means restored from cache
    Completed {
        key: TaskKey,
        duration: Duration,
        cached: bool,
    },
    /// A task failed
    Failed {
        key: TaskKey,
        duration: Duration,
        error: String,
    },
    /// A stale output file was deleted during restore
    StaleOutput { key: TaskKey, path: String },
    /// The whole run finished
    RunCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        not_run: usize,
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
            TaskEvent::Started { key, command } => {
                tracing::info!("Starting {}: {}", key, command);
            }
            TaskEvent::Output {
                key,
                line,
                is_stderr,
            } => {
                if *is_stderr {
                    tracing::warn!("[{}] {}", key, line);
                } else {
                    tracing::debug!("[{}] {}", key, line);
                }
            }
            TaskEvent::Completed {
                key,
                duration,
                cached,
            } => {
                if *cached {
                    tracing::info!("{} restored from cache in {:.1}s", key, duration.as_secs_f64());
                } else {
                    tracing::info!("{} completed in {:.1}s", key, duration.as_secs_f64());
                }
            }
            TaskEvent::Failed {
                key,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.1}s: {}", key, duration.as_secs_f64(), error);
            }
            TaskEvent::StaleOutput { key, path } => {
                tracing::warn!("[{}] removing stale output {}", key, path);
            }
            TaskEvent::RunCompleted {
                total,
                succeeded,
                failed,
                cached,
                not_run,
                duration,
            } => {
                tracing::info!(
                    "Run complete: {}/{} succeeded, {} failed, {} cached, {} not run ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cached,
                    not_run,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let key = TaskKey::new("build", "packages/core");

        reporter.report(&TaskEvent::Started {
            key: key.clone(),
            command: "tsc".to_string(),
        });
        reporter.report(&TaskEvent::Completed {
            key,
            duration: Duration::from_secs(5),
            cached: false,
        });

        assert_eq!(reporter.events().len(), 2);
    }

    #[test]
    fn test_stale_output_event_round_trips() {
        let reporter = CollectingReporter::default();
        reporter.report(&TaskEvent::StaleOutput {
            key: TaskKey::new("build", "."),
            path: "dist/banana.txt".to_string(),
        });

        assert!(matches!(
            &reporter.events()[0],
            TaskEvent::StaleOutput { path, .. } if path == "dist/banana.txt"
        ));
    }
}
