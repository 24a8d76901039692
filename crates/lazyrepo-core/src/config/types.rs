//! Configuration types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Complete lazyrepo configuration (`lazy.config.toml` / `lazy.config.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Baseline cache inputs shared by every script
    pub base_cache: BaseCacheConfig,

    /// Per-script task configuration, keyed by script name
    pub scripts: BTreeMap<String, ScriptConfig>,
}

impl Config {
    /// Look up the configuration for a script, falling back to defaults
    pub fn script(&self, name: &str) -> ScriptConfig {
        self.scripts.get(name).cloned().unwrap_or_default()
    }
}

/// Inputs that every cached script depends on unless it opts out
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BaseCacheConfig {
    /// Extra include patterns added to every script's inputs
    pub include: Vec<String>,

    /// Extra exclude patterns applied to every script's inputs
    pub exclude: Vec<String>,

    /// Environment variables every script depends on
    pub env_inputs: Vec<String>,
}

/// How a script expands across the workspace graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Run only in the workspace it was requested for
    Independent,

    /// Also run in each local dependency workspace that declares the script
    #[default]
    Dependent,

    /// Run exactly once, at the project root
    TopLevel,
}

/// Which workspaces an upstream script runs in before this one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunScope {
    /// Every workspace that declares the upstream script
    #[default]
    All,

    /// Only this workspace
    SelfOnly,

    /// This workspace and its local dependencies
    SelfAndDependencies,
}

/// An upstream ordering relation for a script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunsAfterConfig {
    /// Where the upstream script runs
    #[serde(rename = "in")]
    pub scope: RunScope,

    /// Whether the upstream's output files are inputs of this script
    pub uses_output: bool,
}

impl Default for RunsAfterConfig {
    fn default() -> Self {
        Self {
            scope: RunScope::All,
            uses_output: true,
        }
    }
}

/// Cache rules for a script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheRules {
    /// Input include patterns (workspace-relative unless absolute)
    pub inputs: Vec<String>,

    /// Input exclude patterns
    pub exclude: Vec<String>,

    /// Output patterns captured after a successful run
    pub outputs: Vec<String>,

    /// Environment variables recorded in the input manifest
    pub env_inputs: Vec<String>,

    /// Whether the baseline inputs (lockfile, config, base_cache) apply
    pub inherits_base: bool,

    /// Whether output files of `dependent`-mode dependencies are inputs
    pub uses_output_from_dependencies: bool,
}

impl Default for CacheRules {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            exclude: Vec::new(),
            outputs: Vec::new(),
            env_inputs: Vec::new(),
            inherits_base: true,
            uses_output_from_dependencies: true,
        }
    }
}

/// Configuration of a single script across the monorepo
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScriptConfig {
    /// How the script expands across workspaces
    pub execution: ExecutionMode,

    /// Command run instead of the workspace's declared script entry
    pub base_command: Option<String>,

    /// Whether instances of this script may run concurrently
    pub parallel: Option<bool>,

    /// Upstream scripts that must complete first, keyed by script name
    pub runs_after: BTreeMap<String, RunsAfterConfig>,

    /// Cache rules
    pub cache: CacheRules,
}

impl ScriptConfig {
    /// Whether instances of this script may run concurrently (default: yes)
    pub fn is_parallel(&self) -> bool {
        self.parallel.unwrap_or(true)
    }
}
