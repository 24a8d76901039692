//! Task types and per-task configuration

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lazyrepo_core::config::defaults::{DEFAULT_INPUT_PATTERN, STATE_DIR};
use lazyrepo_core::config::{ExecutionMode, RunScope};
use lazyrepo_core::project::Workspace;
use lazyrepo_core::Project;

/// Unique identifier for a task within a run: a script name plus the
/// project-root-relative workspace directory.
///
/// The canonical rendering `"{script}::{dir}"` is both the map key and the
/// sort key, so the format must stay stable.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    /// Script name
    pub script: String,
    /// Workspace directory, relative to the project root (`.` for the root)
    pub dir: String,
}

impl TaskKey {
    /// Create a new task key
    pub fn new(script: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            dir: dir.into(),
        }
    }

    /// Parse a task key from `"script::dir"` format
    pub fn parse(s: &str) -> Option<Self> {
        let (script, dir) = s.split_once("::")?;
        if script.is_empty() || dir.is_empty() {
            return None;
        }
        Some(Self::new(script, dir))
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.script, self.dir)
    }
}

/// Lifecycle of a scheduled task. Terminal states never revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not yet started
    Pending,
    /// Currently executing
    Running,
    /// Command ran successfully this run
    EagerSuccess,
    /// Skipped via cache restore
    LazySuccess,
    /// Command or pipeline failed
    Failure(String),
}

impl TaskStatus {
    /// Whether this status represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::EagerSuccess | Self::LazySuccess)
    }

    /// Whether the task has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::EagerSuccess | Self::LazySuccess | Self::Failure(_)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::EagerSuccess => write!(f, "success:eager"),
            Self::LazySuccess => write!(f, "success:lazy"),
            Self::Failure(_) => write!(f, "failure"),
        }
    }
}

/// A task the user asked for on the command line
#[derive(Debug, Clone, Default)]
pub struct RequestedTask {
    /// Script name
    pub script: String,
    /// Extra arguments appended to the command
    pub extra_args: Vec<String>,
    /// Bypass the cache even on a fingerprint match
    pub force: bool,
    /// Workspace filter paths (globs or directories); empty means all
    pub filter_paths: Vec<String>,
}

impl RequestedTask {
    /// Request a script with no filters
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }
}

/// An upstream ordering relation resolved for one task
#[derive(Debug, Clone)]
pub struct RunsAfter {
    /// Upstream script name
    pub script: String,
    /// Which workspaces the upstream runs in
    pub scope: RunScope,
    /// Whether the upstream's output files are inputs of this task
    pub uses_output: bool,
}

/// A dependency edge of a scheduled task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepEdge {
    /// Key of the dependency task
    pub key: TaskKey,
    /// Whether the dependency's output files feed this task's manifest
    pub uses_output: bool,
}

/// A completed dependency as seen by a downstream task's manifest.
///
/// Snapshot taken when the downstream task starts; by then the upstream is
/// terminal, so fingerprint and output files are final.
#[derive(Debug, Clone)]
pub struct UpstreamTask {
    /// Key of the upstream task
    pub key: TaskKey,
    /// The upstream's input-manifest fingerprint
    pub fingerprint: String,
    /// The upstream's output files, project-root-relative
    pub output_files: Vec<String>,
    /// Whether those output files are inputs of the downstream task
    pub uses_output: bool,
}

/// Fully resolved configuration of one (workspace, script) task.
///
/// Derived from the user config and the project layout; immutable during
/// a run.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// How the script expands across workspaces
    pub execution: ExecutionMode,
    /// Whether instances of this script may run concurrently
    pub parallel: bool,
    /// Upstream ordering relations
    pub runs_after: Vec<RunsAfter>,
    /// Input include patterns (workspace-relative unless absolute)
    pub inputs: Vec<String>,
    /// Input exclude patterns
    pub exclude: Vec<String>,
    /// Output patterns captured after a successful run
    pub outputs: Vec<String>,
    /// Environment variables recorded in the manifest (sorted)
    pub env_inputs: Vec<String>,
    /// Whether the baseline inputs (lockfile, config files) apply
    pub inherits_base: bool,
    /// Whether output files of `dependent`-mode dependencies are inputs
    pub uses_output_from_dependencies: bool,
    /// Command run instead of the workspace's declared script entry
    pub base_command: Option<String>,

    /// Persisted input manifest
    pub manifest_path: PathBuf,
    /// Persisted output manifest
    pub output_manifest_path: PathBuf,
    /// Cached output file tree
    pub cache_dir: PathBuf,
    /// Captured command log
    pub log_path: PathBuf,
}

impl TaskConfig {
    /// Resolve the configuration for a script in a workspace.
    ///
    /// Baseline include/exclude patterns are absolutized against the
    /// project root here so the manifest engine only has to distinguish
    /// absolute from workspace-relative patterns. The default input set
    /// for a workspace task with no explicit includes is everything under
    /// the workspace.
    pub fn resolve(project: &Project, workspace: &Workspace, script: &str) -> Self {
        let script_cfg = project.script_config(script);
        let base = &project.config().base_cache;
        let top_level = script_cfg.execution == ExecutionMode::TopLevel;

        let mut inputs = script_cfg.cache.inputs.clone();
        if inputs.is_empty() && !top_level {
            inputs.push(DEFAULT_INPUT_PATTERN.to_string());
        }
        let mut exclude = script_cfg.cache.exclude.clone();
        let mut env_inputs = script_cfg.cache.env_inputs.clone();

        if script_cfg.cache.inherits_base {
            let rooted = |p: &String| project.root().join(p).to_string_lossy().to_string();
            inputs.extend(base.include.iter().map(rooted));
            exclude.extend(base.exclude.iter().map(rooted));
            env_inputs.extend(base.env_inputs.iter().cloned());
        }
        env_inputs.sort();
        env_inputs.dedup();

        let runs_after = script_cfg
            .runs_after
            .iter()
            .map(|(name, cfg)| RunsAfter {
                script: name.clone(),
                scope: cfg.scope,
                uses_output: cfg.uses_output,
            })
            .collect();

        let state_dir = workspace.dir.join(STATE_DIR).join(script);

        Self {
            execution: script_cfg.execution,
            parallel: script_cfg.is_parallel(),
            runs_after,
            inputs,
            exclude,
            outputs: script_cfg.cache.outputs.clone(),
            env_inputs,
            inherits_base: script_cfg.cache.inherits_base,
            uses_output_from_dependencies: script_cfg.cache.uses_output_from_dependencies,
            base_command: script_cfg.base_command.clone(),
            manifest_path: state_dir.join("manifest.tsv"),
            output_manifest_path: state_dir.join("output-manifest.tsv"),
            cache_dir: state_dir.join("output"),
            log_path: state_dir.join("output.log"),
        }
    }
}

/// A concrete (workspace, script) node in the task graph.
///
/// Status transitions happen only on the scheduler; fingerprint and
/// output files are filled in by the worker's completion event.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// Canonical identifier
    pub key: TaskKey,
    /// Absolute workspace directory
    pub workspace_dir: PathBuf,
    /// Script name
    pub script: String,
    /// The shell command this task runs
    pub command: String,
    /// Extra arguments appended to the command
    pub extra_args: Vec<String>,
    /// Bypass the cache even on a fingerprint match
    pub force: bool,
    /// Resolved configuration
    pub config: TaskConfig,
    /// Current lifecycle state
    pub status: TaskStatus,
    /// Dependency edges, in discovery order, deduplicated by key
    pub deps: Vec<DepEdge>,
    /// Output files (project-root-relative) after a run or restore
    pub output_files: Vec<String>,
    /// Input-manifest fingerprint, populated once computed
    pub fingerprint: Option<String>,
}

impl ScheduledTask {
    /// Add a dependency edge, unioning `uses_output` on duplicates
    pub fn add_dep(&mut self, key: TaskKey, uses_output: bool) {
        if let Some(existing) = self.deps.iter_mut().find(|d| d.key == key) {
            existing.uses_output |= uses_output;
        } else {
            self.deps.push(DepEdge { key, uses_output });
        }
    }
}

/// Resolve the command string a task will run.
///
/// The configured base command wins over the workspace's declared script
/// entry.
pub fn task_command(config: &TaskConfig, workspace: &Workspace, script: &str) -> Option<String> {
    config
        .base_command
        .clone()
        .or_else(|| workspace.scripts.get(script).cloned())
}

/// Join a workspace directory and a task path into a display path
pub fn display_rel(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
