//! Shell command execution
//!
//! Runs a task's command through `sh -c` in the workspace directory,
//! streaming both stdio channels line-by-line to the reporter and to the
//! task's captured log file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::TaskKey;

/// Errors while running a task's command
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The process could not be spawned
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// The captured log file could not be written
    #[error("Failed to write log {path}: {source}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("Failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },
}

/// Result of running a command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,
    /// Wall-clock duration
    pub duration: Duration,
}

impl CommandOutcome {
    /// Whether the command exited successfully
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs task commands through the system shell
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Run `command` (with `extra_args` appended) in `cwd`.
    ///
    /// The log file is truncated at start; every output line goes both to
    /// the reporter and to the log.
    pub async fn run(
        &self,
        key: &TaskKey,
        command: &str,
        extra_args: &[String],
        cwd: &Path,
        log_path: &Path,
        reporter: &dyn TaskReporter,
    ) -> Result<CommandOutcome, RunnerError> {
        let start = Instant::now();

        let full_command = if extra_args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, extra_args.join(" "))
        };

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RunnerError::Log {
                    path: log_path.to_path_buf(),
                    source,
                })?;
        }
        let mut log = tokio::fs::File::create(log_path)
            .await
            .map_err(|source| RunnerError::Log {
                path: log_path.to_path_buf(),
                source,
            })?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&full_command)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: full_command.clone(),
                source,
            })?;

        // Both pipes are drained concurrently; a reader per stream feeds
        // one channel so the log file has a single writer. Draining only
        // one stream at a time can wedge the child once the other pipe's
        // buffer fills.
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<(String, bool)>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, false, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, true, line_tx.clone());
        }
        drop(line_tx);

        while let Some((line, is_stderr)) = line_rx.recv().await {
            reporter.report(&TaskEvent::Output {
                key: key.clone(),
                line: line.clone(),
                is_stderr,
            });
            self.log_line(&mut log, log_path, &line).await?;
        }

        let status = child.wait().await.map_err(|source| RunnerError::Wait {
            command: full_command,
            source,
        })?;

        Ok(CommandOutcome {
            exit_code: status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    async fn log_line(
        &self,
        log: &mut tokio::fs::File,
        log_path: &Path,
        line: &str,
    ) -> Result<(), RunnerError> {
        let log_err = |source| RunnerError::Log {
            path: log_path.to_path_buf(),
            source,
        };
        log.write_all(line.as_bytes()).await.map_err(log_err)?;
        log.write_all(b"\n").await.map_err(log_err)
    }
}

/// Read a pipe to EOF line by line, forwarding each line to the channel
fn spawn_line_reader<R>(stream: R, is_stderr: bool, tx: mpsc::UnboundedSender<(String, bool)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((line, is_stderr)).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_captures_exit_code_and_log() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join(".lazy/build/output.log");
        let reporter = CollectingReporter::default();
        let runner = ShellRunner;

        let outcome = runner
            .run(
                &TaskKey::new("build", "."),
                "echo hello && echo oops >&2",
                &[],
                temp.path(),
                &log_path,
                &reporter,
            )
            .await
            .unwrap();

        assert!(outcome.is_success());

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("hello"));
        assert!(log.contains("oops"));

        let events = reporter.events();
        assert!(events.iter().any(|e| matches!(
            e,
            TaskEvent::Output { line, is_stderr: false, .. } if line == "hello"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            TaskEvent::Output { line, is_stderr: true, .. } if line == "oops"
        )));
    }

    #[tokio::test]
    async fn test_run_reports_failure_exit_code() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");
        let reporter = CollectingReporter::default();

        let outcome = ShellRunner
            .run(
                &TaskKey::new("build", "."),
                "exit 3",
                &[],
                temp.path(),
                &log_path,
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_extra_args_are_appended() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");
        let reporter = CollectingReporter::default();

        ShellRunner
            .run(
                &TaskKey::new("build", "."),
                "echo",
                &["alpha".to_string(), "beta".to_string()],
                temp.path(),
                &log_path,
                &reporter,
            )
            .await
            .unwrap();

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.trim(), "alpha beta");
    }

    #[tokio::test]
    async fn test_large_stderr_does_not_stall_stdout() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");
        let reporter = CollectingReporter::default();

        // Well past the OS pipe buffer on stderr while stdout stays open.
        let outcome = ShellRunner
            .run(
                &TaskKey::new("build", "."),
                "seq 1 20000 >&2 && echo done",
                &[],
                temp.path(),
                &log_path,
                &reporter,
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("20000"));
        assert!(log.contains("done"));
    }

    #[tokio::test]
    async fn test_log_truncated_between_runs() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("output.log");
        let reporter = CollectingReporter::default();

        for message in ["first", "second"] {
            ShellRunner
                .run(
                    &TaskKey::new("build", "."),
                    &format!("echo {message}"),
                    &[],
                    temp.path(),
                    &log_path,
                    &reporter,
                )
                .await
                .unwrap();
        }

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.trim(), "second");
    }
}
