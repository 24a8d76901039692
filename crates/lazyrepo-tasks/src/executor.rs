//! Per-task execution pipeline
//!
//! Each worker runs one task through the cache decision: compute the input
//! manifest, compare its fingerprint against the persisted one, then either
//! restore the cached outputs or run the command and capture fresh ones.
//! The manifest is persisted only after a successful run, so a failed task
//! re-executes on the next invocation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::manifest::{compute_manifest, persist_manifest, previous_fingerprint};
use crate::outputs::{capture_outputs, restore_outputs};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::runner::ShellRunner;
use crate::task::{TaskConfig, TaskKey, TaskStatus, UpstreamTask};

use lazyrepo_core::config::ExecutionMode;

/// Everything a worker needs to evaluate one task.
///
/// Snapshotted by the scheduler when the task starts; immutable from then
/// on, so workers never touch shared state.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Canonical identifier
    pub key: TaskKey,
    /// Absolute project root
    pub root_dir: PathBuf,
    /// Absolute workspace directory (the command's cwd)
    pub workspace_dir: PathBuf,
    /// The shell command to run on a cache miss
    pub command: String,
    /// Extra arguments appended to the command
    pub extra_args: Vec<String>,
    /// Bypass the cache even on a fingerprint match
    pub force: bool,
    /// Resolved task configuration
    pub config: TaskConfig,
    /// Baseline input files (lockfile, config files)
    pub global_files: Vec<PathBuf>,
    /// Completed dependencies feeding this task's manifest
    pub upstreams: Vec<UpstreamTask>,
}

impl TaskContext {
    fn is_top_level(&self) -> bool {
        self.config.execution == ExecutionMode::TopLevel
    }
}

/// Terminal result of one task, handed back to the scheduler
#[derive(Debug)]
pub struct TaskOutcome {
    /// Final status (always terminal)
    pub status: TaskStatus,
    /// The computed input-manifest fingerprint
    pub fingerprint: Option<String>,
    /// Output files owned by the task, project-root-relative
    pub output_files: Vec<String>,
    /// Wall-clock duration of the whole pipeline
    pub duration: Duration,
}

/// Drive one task through the cache decision to a terminal status.
///
/// Never returns an error: every failure mode maps to `TaskStatus::Failure`
/// so the scheduler can keep other tasks going.
pub async fn run_task(ctx: &TaskContext, reporter: &dyn TaskReporter) -> TaskOutcome {
    let start = Instant::now();

    let manifest = match compute_manifest(
        &ctx.root_dir,
        &ctx.workspace_dir,
        &ctx.config,
        ctx.is_top_level(),
        &ctx.global_files,
        &ctx.upstreams,
    ) {
        Ok(manifest) => manifest,
        Err(e) => return fail(ctx, reporter, start, e.to_string()),
    };
    let fingerprint = manifest.fingerprint();

    let previous = previous_fingerprint(&ctx.config.manifest_path);
    let cache_hit = !ctx.force && previous.as_deref() == Some(fingerprint.as_str());

    if cache_hit {
        match restore_outputs(&ctx.root_dir, &ctx.workspace_dir, &ctx.config) {
            Ok(outcome) => {
                for path in &outcome.purged {
                    reporter.report(&TaskEvent::StaleOutput {
                        key: ctx.key.clone(),
                        path: path.clone(),
                    });
                }
                // The persisted manifest already holds these exact bytes.
                reporter.report(&TaskEvent::Completed {
                    key: ctx.key.clone(),
                    duration: start.elapsed(),
                    cached: true,
                });
                return TaskOutcome {
                    status: TaskStatus::LazySuccess,
                    fingerprint: Some(fingerprint),
                    output_files: outcome.output_files(),
                    duration: start.elapsed(),
                };
            }
            Err(e) => {
                warn!(task = %ctx.key, error = %e, "cache restore failed, re-running");
            }
        }
    } else {
        debug!(
            task = %ctx.key,
            forced = ctx.force,
            had_previous = previous.is_some(),
            "cache miss"
        );
    }

    reporter.report(&TaskEvent::Started {
        key: ctx.key.clone(),
        command: ctx.command.clone(),
    });

    let run = ShellRunner
        .run(
            &ctx.key,
            &ctx.command,
            &ctx.extra_args,
            &ctx.workspace_dir,
            &ctx.config.log_path,
            reporter,
        )
        .await;

    let outcome = match run {
        Ok(outcome) => outcome,
        Err(e) => return fail(ctx, reporter, start, e.to_string()),
    };

    if !outcome.is_success() {
        return fail(
            ctx,
            reporter,
            start,
            format!("command exited with code {}", outcome.exit_code),
        );
    }

    let output_files = match capture_outputs(&ctx.root_dir, &ctx.workspace_dir, &ctx.config) {
        Ok(files) => files,
        Err(e) => return fail(ctx, reporter, start, e.to_string()),
    };

    if let Err(e) = persist_manifest(&manifest, &ctx.config.manifest_path) {
        return fail(ctx, reporter, start, e.to_string());
    }

    reporter.report(&TaskEvent::Completed {
        key: ctx.key.clone(),
        duration: start.elapsed(),
        cached: false,
    });
    TaskOutcome {
        status: TaskStatus::EagerSuccess,
        fingerprint: Some(fingerprint),
        output_files,
        duration: start.elapsed(),
    }
}

fn fail(
    ctx: &TaskContext,
    reporter: &dyn TaskReporter,
    start: Instant,
    error: String,
) -> TaskOutcome {
    reporter.report(&TaskEvent::Failed {
        key: ctx.key.clone(),
        duration: start.elapsed(),
        error: error.clone(),
    });
    TaskOutcome {
        status: TaskStatus::Failure(error),
        fingerprint: None,
        output_files: Vec::new(),
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::reporter::CollectingReporter;

    fn context(temp: &TempDir, command: &str) -> TaskContext {
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(&ws).unwrap();
        let state = ws.join(".lazy/build");
        TaskContext {
            key: TaskKey::new("build", "pkg"),
            root_dir: temp.path().to_path_buf(),
            workspace_dir: ws.clone(),
            command: command.to_string(),
            extra_args: Vec::new(),
            force: false,
            config: TaskConfig {
                execution: ExecutionMode::Independent,
                parallel: true,
                runs_after: Vec::new(),
                inputs: vec!["src/**/*".to_string()],
                exclude: Vec::new(),
                outputs: vec!["dist/**/*".to_string()],
                env_inputs: Vec::new(),
                inherits_base: true,
                uses_output_from_dependencies: true,
                base_command: None,
                manifest_path: state.join("manifest.tsv"),
                output_manifest_path: state.join("output-manifest.tsv"),
                cache_dir: state.join("output"),
                log_path: state.join("output.log"),
            },
            global_files: Vec::new(),
            upstreams: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "mkdir -p dist && echo built > dist/out.txt");
        std::fs::create_dir_all(ctx.workspace_dir.join("src")).unwrap();
        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "export {}").unwrap();

        let reporter = CollectingReporter::default();
        let first = run_task(&ctx, &reporter).await;
        assert_eq!(first.status, TaskStatus::EagerSuccess);
        assert_eq!(first.output_files, vec!["pkg/dist/out.txt"]);

        let second = run_task(&ctx, &reporter).await;
        assert_eq!(second.status, TaskStatus::LazySuccess);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(second.output_files, first.output_files);
    }

    #[tokio::test]
    async fn test_input_change_invalidates() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "mkdir -p dist && cp src/index.ts dist/out.txt");
        std::fs::create_dir_all(ctx.workspace_dir.join("src")).unwrap();
        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "one").unwrap();

        let reporter = CollectingReporter::default();
        let first = run_task(&ctx, &reporter).await;
        assert_eq!(first.status, TaskStatus::EagerSuccess);

        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "two").unwrap();
        let second = run_task(&ctx, &reporter).await;
        assert_eq!(second.status, TaskStatus::EagerSuccess);
        assert_ne!(second.fingerprint, first.fingerprint);
    }

    #[tokio::test]
    async fn test_force_bypasses_cache() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp, "mkdir -p dist && echo built > dist/out.txt");
        std::fs::create_dir_all(ctx.workspace_dir.join("src")).unwrap();
        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "x").unwrap();

        let reporter = CollectingReporter::default();
        run_task(&ctx, &reporter).await;

        ctx.force = true;
        let second = run_task(&ctx, &reporter).await;
        assert_eq!(second.status, TaskStatus::EagerSuccess);
    }

    #[tokio::test]
    async fn test_failure_does_not_persist_manifest() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "echo partial > partial.txt && exit 1");

        let reporter = CollectingReporter::default();
        let outcome = run_task(&ctx, &reporter).await;

        assert!(matches!(outcome.status, TaskStatus::Failure(_)));
        assert!(!ctx.config.manifest_path.exists());
        // The command itself still ran to completion.
        assert!(ctx.workspace_dir.join("partial.txt").exists());

        // Next invocation runs again instead of hitting the cache.
        let retry = run_task(&ctx, &reporter).await;
        assert!(matches!(retry.status, TaskStatus::Failure(_)));
    }

    #[tokio::test]
    async fn test_deleted_outputs_restored_on_hit() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "mkdir -p dist && echo built > dist/out.txt");
        std::fs::create_dir_all(ctx.workspace_dir.join("src")).unwrap();
        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "x").unwrap();

        let reporter = CollectingReporter::default();
        run_task(&ctx, &reporter).await;

        let out = ctx.workspace_dir.join("dist/out.txt");
        let original_mtime =
            crate::manifest::mtime_millis(&std::fs::metadata(&out).unwrap());
        std::fs::remove_file(&out).unwrap();

        let second = run_task(&ctx, &reporter).await;
        assert_eq!(second.status, TaskStatus::LazySuccess);
        assert!(out.exists());
        assert_eq!(
            crate::manifest::mtime_millis(&std::fs::metadata(&out).unwrap()),
            original_mtime
        );
    }

    #[tokio::test]
    async fn test_stale_output_swept_and_reported() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp, "mkdir -p dist && echo built > dist/out.txt");
        std::fs::create_dir_all(ctx.workspace_dir.join("src")).unwrap();
        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "x").unwrap();

        let reporter = CollectingReporter::default();
        run_task(&ctx, &reporter).await;

        std::fs::write(ctx.workspace_dir.join("dist/banana.txt"), "stray").unwrap();

        let second = run_task(&ctx, &reporter).await;
        assert_eq!(second.status, TaskStatus::LazySuccess);
        assert!(!ctx.workspace_dir.join("dist/banana.txt").exists());
        assert!(reporter.events().iter().any(|e| matches!(
            e,
            TaskEvent::StaleOutput { path, .. } if path == "pkg/dist/banana.txt"
        )));
    }

    #[tokio::test]
    async fn test_upstream_fingerprint_changes_invalidate() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp, "mkdir -p dist && echo built > dist/out.txt");
        std::fs::create_dir_all(ctx.workspace_dir.join("src")).unwrap();
        std::fs::write(ctx.workspace_dir.join("src/index.ts"), "x").unwrap();
        ctx.upstreams = vec![UpstreamTask {
            key: TaskKey::new("codegen", "pkg"),
            fingerprint: "aaaa".to_string(),
            output_files: Vec::new(),
            uses_output: false,
        }];

        let reporter = CollectingReporter::default();
        let first = run_task(&ctx, &reporter).await;
        assert_eq!(first.status, TaskStatus::EagerSuccess);

        // Upstream inputs changed even though no file content did.
        ctx.upstreams[0].fingerprint = "bbbb".to_string();
        let second = run_task(&ctx, &reporter).await;
        assert_eq!(second.status, TaskStatus::EagerSuccess);
        assert_ne!(second.fingerprint, first.fingerprint);
    }
}
