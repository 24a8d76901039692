//! The project model consumed by the task engine

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::defaults::{lockfile_names, CONFIG_FILE_GLOB};
use crate::config::{load_config_or_default, Config, ExecutionMode, ScriptConfig};
use crate::error::{ProjectError, Result};

use super::discovery::discover_workspaces;
use super::workspace::{Workspace, WorkspaceRoot};

/// The loaded monorepo: root, configuration and every workspace.
///
/// Immutable after loading; the task engine only reads from it.
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    config: Config,
    workspaces: BTreeMap<PathBuf, Workspace>,
    names: BTreeMap<String, PathBuf>,
}

impl Project {
    /// Locate the monorepo root at or above `start_dir` and load everything
    pub fn load(start_dir: &Path) -> Result<Self> {
        let root = WorkspaceRoot::find(start_dir)?;
        let workspaces = discover_workspaces(&root)?;
        let (config, config_path) = load_config_or_default(&root.root);
        debug!(
            root = %root.root.display(),
            config = ?config_path,
            workspaces = workspaces.len(),
            "project loaded"
        );
        Ok(Self::new(root.root, config, workspaces))
    }

    /// Assemble a project from already-discovered parts
    pub fn new(root: PathBuf, config: Config, workspaces: BTreeMap<PathBuf, Workspace>) -> Self {
        let names = workspaces
            .values()
            .map(|w| (w.name.clone(), w.dir.clone()))
            .collect();
        Self {
            root,
            config,
            workspaces,
            names,
        }
    }

    /// Absolute path of the monorepo root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every workspace, keyed by absolute directory (sorted)
    pub fn workspaces_by_dir(&self) -> &BTreeMap<PathBuf, Workspace> {
        &self.workspaces
    }

    /// Look up a workspace by its directory
    pub fn workspace_by_dir(&self, dir: &Path) -> Option<&Workspace> {
        self.workspaces.get(dir)
    }

    /// Look up a workspace by its package name
    pub fn workspace_by_name(&self, name: &str) -> Option<&Workspace> {
        self.names.get(name).and_then(|dir| self.workspaces.get(dir))
    }

    /// The workspace at the monorepo root (target of top-level scripts)
    pub fn root_workspace(&self) -> Result<&Workspace> {
        self.workspaces
            .get(&self.root)
            .ok_or_else(|| ProjectError::UnknownWorkspace(self.root.display().to_string()).into())
    }

    /// Whether a script runs once at the project root
    pub fn is_top_level_script(&self, name: &str) -> bool {
        self.config.script(name).execution == ExecutionMode::TopLevel
    }

    /// Configuration for a script (defaults when unconfigured)
    pub fn script_config(&self, name: &str) -> ScriptConfig {
        self.config.script(name)
    }

    /// Canonical task key: `"{script}::{relative workspace dir}"`.
    ///
    /// Directories are relative to the project root with forward slashes;
    /// the root workspace is `"."`. Keys double as sort keys, so the
    /// format must stay stable.
    pub fn task_key(&self, dir: &Path, script: &str) -> String {
        format!("{}::{}", script, self.rel_dir(dir))
    }

    /// Project-root-relative rendering of a workspace directory
    pub fn rel_dir(&self, dir: &Path) -> String {
        let rel = dir.strip_prefix(&self.root).unwrap_or(dir);
        if rel.as_os_str().is_empty() {
            ".".to_string()
        } else {
            // Forward slashes on every platform.
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        }
    }

    /// The package-manager lockfile at the root, if any
    pub fn lockfile(&self) -> Option<PathBuf> {
        lockfile_names()
            .iter()
            .map(|name| self.root.join(name))
            .find(|path| path.exists())
    }

    /// Configuration files at the root (`lazy.config.*`)
    pub fn config_files(&self) -> Vec<PathBuf> {
        let pattern = self.root.join(CONFIG_FILE_GLOB).to_string_lossy().to_string();
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Project) {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"], "scripts": {"release": "echo go"}}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("pnpm-lock.yaml"), "lockfileVersion: 9\n").unwrap();
        std::fs::write(
            temp.path().join("lazy.config.toml"),
            "[scripts.release]\nexecution = \"top-level\"\n",
        )
        .unwrap();

        for (name, deps) in [("core", "{}"), ("utils", r#"{"core": "workspace:*"}"#)] {
            let dir = temp.path().join("packages").join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("package.json"),
                format!(
                    r#"{{"name": "{name}", "scripts": {{"build": "tsc"}}, "dependencies": {deps}}}"#
                ),
            )
            .unwrap();
        }

        let project = Project::load(temp.path()).unwrap();
        (temp, project)
    }

    #[test]
    fn test_lookups() {
        let (temp, project) = fixture();

        assert_eq!(project.workspaces_by_dir().len(), 3);
        assert!(project.workspace_by_name("utils").is_some());
        assert!(project
            .workspace_by_dir(&temp.path().join("packages/core"))
            .is_some());
        assert_eq!(project.root_workspace().unwrap().name, "root");
    }

    #[test]
    fn test_task_key_uses_relative_dirs() {
        let (temp, project) = fixture();

        let core_dir = temp.path().join("packages/core");
        assert_eq!(project.task_key(&core_dir, "build"), "build::packages/core");
        assert_eq!(project.task_key(temp.path(), "release"), "release::.");
    }

    #[test]
    fn test_top_level_script_from_config() {
        let (_temp, project) = fixture();
        assert!(project.is_top_level_script("release"));
        assert!(!project.is_top_level_script("build"));
    }

    #[test]
    fn test_lockfile_and_config_files() {
        let (temp, project) = fixture();
        assert_eq!(
            project.lockfile(),
            Some(temp.path().join("pnpm-lock.yaml"))
        );
        let configs = project.config_files();
        assert_eq!(configs, vec![temp.path().join("lazy.config.toml")]);
    }
}
