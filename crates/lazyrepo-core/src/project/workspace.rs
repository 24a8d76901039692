//! Workspace root detection

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{ProjectError, Result};

/// A single package within the monorepo.
///
/// Identity is the directory; names are unique across a project but the
/// directory is what task keys and lookups are built from.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Absolute path to the package directory
    pub dir: PathBuf,
    /// Package name from its manifest
    pub name: String,
    /// Declared script commands, keyed by script name
    pub scripts: std::collections::BTreeMap<String, String>,
    /// Names of sibling workspaces this package depends on
    pub local_deps: Vec<String>,
}

impl Workspace {
    /// Whether this workspace declares the given script
    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

/// The detected monorepo root with its package location patterns
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    /// Absolute path to the monorepo root
    pub root: PathBuf,
    /// Glob patterns for package locations, relative to the root
    pub package_patterns: Vec<String>,
}

#[derive(Deserialize)]
struct PackageJson {
    workspaces: Option<WorkspacesField>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkspacesField {
    Array(Vec<String>),
    Object { packages: Vec<String> },
}

#[derive(Deserialize)]
struct PnpmWorkspace {
    packages: Option<Vec<String>>,
}

impl WorkspaceRoot {
    /// Find the monorepo root at or above `start_dir`.
    ///
    /// A directory is a root when it holds a `pnpm-workspace.yaml` or a
    /// `package.json` with a `workspaces` field. The nearest match wins.
    pub fn find(start_dir: &Path) -> Result<Self> {
        debug!(start_dir = %start_dir.display(), "searching for monorepo root");
        let mut current = start_dir.to_path_buf();

        loop {
            if let Some(found) = Self::detect(&current)? {
                return Ok(found);
            }
            if !current.pop() {
                break;
            }
        }

        Err(ProjectError::RootNotFound(start_dir.to_path_buf()).into())
    }

    /// Detect whether `dir` itself is a monorepo root
    pub fn detect(dir: &Path) -> Result<Option<Self>> {
        let pnpm_workspace = dir.join("pnpm-workspace.yaml");
        if pnpm_workspace.exists() {
            let content =
                std::fs::read_to_string(&pnpm_workspace).map_err(ProjectError::Io)?;
            let parsed: PnpmWorkspace =
                serde_yaml::from_str(&content).unwrap_or(PnpmWorkspace { packages: None });
            debug!(root = %dir.display(), "found pnpm workspace root");
            return Ok(Some(Self {
                root: dir.to_path_buf(),
                package_patterns: parsed
                    .packages
                    .unwrap_or_else(|| vec!["packages/*".to_string()]),
            }));
        }

        let package_json = dir.join("package.json");
        if package_json.exists() {
            let content = std::fs::read_to_string(&package_json).map_err(ProjectError::Io)?;
            let parsed: PackageJson =
                serde_json::from_str(&content).unwrap_or(PackageJson { workspaces: None });

            if let Some(workspaces) = parsed.workspaces {
                let patterns = match workspaces {
                    WorkspacesField::Array(arr) => arr,
                    WorkspacesField::Object { packages } => packages,
                };
                debug!(root = %dir.display(), "found npm workspace root");
                return Ok(Some(Self {
                    root: dir.to_path_buf(),
                    package_patterns: patterns,
                }));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_npm_workspace_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "my-monorepo", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.package_patterns, vec!["packages/*"]);
    }

    #[test]
    fn test_detect_object_workspaces() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"workspaces": {"packages": ["packages/*", "apps/*"]}}"#,
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.package_patterns, vec!["packages/*", "apps/*"]);
    }

    #[test]
    fn test_detect_pnpm_workspace_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("pnpm-workspace.yaml"),
            "packages:\n  - 'packages/*'\n",
        )
        .unwrap();

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        assert_eq!(root.package_patterns, vec!["packages/*"]);
    }

    #[test]
    fn test_find_walks_up_to_root() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        let nested = temp.path().join("packages/core/src");
        std::fs::create_dir_all(&nested).unwrap();

        let root = WorkspaceRoot::find(&nested).unwrap();
        assert_eq!(root.root, temp.path());
    }

    #[test]
    fn test_find_fails_without_root() {
        let temp = TempDir::new().unwrap();
        // A plain package.json without workspaces is not a monorepo root.
        std::fs::write(temp.path().join("package.json"), r#"{"name": "solo"}"#).unwrap();

        assert!(WorkspaceRoot::detect(temp.path()).unwrap().is_none());
    }
}
