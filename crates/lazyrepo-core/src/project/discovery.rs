//! Package discovery in the monorepo

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::glob;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ProjectError, Result};

use super::workspace::{Workspace, WorkspaceRoot};

#[derive(Deserialize)]
struct PackageManifest {
    name: Option<String>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(rename = "devDependencies", default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(rename = "peerDependencies", default)]
    peer_dependencies: BTreeMap<String, String>,
}

/// Discover every workspace in the monorepo, including the root itself.
///
/// The returned map is keyed by absolute workspace directory; local
/// dependency edges are resolved against the names of the other
/// discovered workspaces.
pub fn discover_workspaces(root: &WorkspaceRoot) -> Result<BTreeMap<PathBuf, Workspace>> {
    debug!(
        root = %root.root.display(),
        patterns = root.package_patterns.len(),
        "discovering workspaces"
    );

    let mut manifests: Vec<(PathBuf, PackageManifest)> = Vec::new();

    // The root package participates like any other workspace; top-level
    // scripts target it.
    if let Some(manifest) = read_manifest(&root.root)? {
        manifests.push((root.root.clone(), manifest));
    }

    for pattern in &root.package_patterns {
        let full_pattern = root.root.join(pattern).to_string_lossy().to_string();
        let entries = glob(&full_pattern).map_err(|e| ProjectError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;

        for entry in entries {
            let dir = entry.map_err(|e| ProjectError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            if !dir.is_dir() {
                continue;
            }
            if let Some(manifest) = read_manifest(&dir)? {
                manifests.push((dir, manifest));
            }
        }
    }

    let all_names: Vec<String> = manifests
        .iter()
        .filter_map(|(_, m)| m.name.clone())
        .collect();

    let mut workspaces: BTreeMap<PathBuf, Workspace> = BTreeMap::new();
    let mut seen_names: BTreeMap<String, PathBuf> = BTreeMap::new();

    for (dir, manifest) in manifests {
        let name = match manifest.name {
            Some(ref name) => name.clone(),
            // Anonymous packages cannot be depended on; skip them.
            None => continue,
        };

        if let Some(first) = seen_names.get(&name) {
            if *first != dir {
                return Err(ProjectError::DuplicateName {
                    name,
                    first: first.clone(),
                    second: dir,
                }
                .into());
            }
            continue;
        }
        seen_names.insert(name.clone(), dir.clone());

        let local_deps = resolve_local_deps(&manifest, &name, &all_names);
        workspaces.insert(
            dir.clone(),
            Workspace {
                dir,
                name,
                scripts: manifest.scripts,
                local_deps,
            },
        );
    }

    info!(count = workspaces.len(), "discovered workspaces");
    Ok(workspaces)
}

fn read_manifest(dir: &Path) -> Result<Option<PackageManifest>> {
    let manifest_path = dir.join("package.json");
    if !manifest_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&manifest_path).map_err(ProjectError::Io)?;
    let manifest =
        serde_json::from_str(&content).map_err(|e| ProjectError::ManifestParse {
            path: manifest_path,
            message: e.to_string(),
        })?;
    Ok(Some(manifest))
}

/// Dependency entries whose name matches another workspace become local edges
fn resolve_local_deps(manifest: &PackageManifest, own_name: &str, all_names: &[String]) -> Vec<String> {
    let mut deps: Vec<String> = manifest
        .dependencies
        .keys()
        .chain(manifest.dev_dependencies.keys())
        .chain(manifest.peer_dependencies.keys())
        .filter(|name| name.as_str() != own_name && all_names.contains(name))
        .cloned()
        .collect();

    deps.sort();
    deps.dedup();
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(root: &Path, rel: &str, json: &str) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), json).unwrap();
    }

    #[test]
    fn test_discover_workspaces_with_deps() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"], "scripts": {"deploy": "echo deploy"}}"#,
        )
        .unwrap();
        write_package(
            temp.path(),
            "packages/core",
            r#"{"name": "core", "scripts": {"build": "tsc"}}"#,
        );
        write_package(
            temp.path(),
            "packages/utils",
            r#"{
                "name": "utils",
                "scripts": {"build": "tsc"},
                "dependencies": {"core": "workspace:*", "left-pad": "1.0.0"}
            }"#,
        );

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        let workspaces = discover_workspaces(&root).unwrap();

        assert_eq!(workspaces.len(), 3);

        let utils = workspaces
            .values()
            .find(|w| w.name == "utils")
            .unwrap();
        assert_eq!(utils.local_deps, vec!["core"]);
        assert!(utils.has_script("build"));

        let root_ws = workspaces.get(temp.path()).unwrap();
        assert_eq!(root_ws.name, "root");
        assert!(root_ws.has_script("deploy"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        write_package(temp.path(), "packages/a", r#"{"name": "dupe"}"#);
        write_package(temp.path(), "packages/b", r#"{"name": "dupe"}"#);

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        let result = discover_workspaces(&root);
        assert!(result.is_err());
    }

    #[test]
    fn test_anonymous_packages_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();
        write_package(temp.path(), "packages/anon", r#"{"scripts": {"build": "tsc"}}"#);

        let root = WorkspaceRoot::detect(temp.path()).unwrap().unwrap();
        let workspaces = discover_workspaces(&root).unwrap();
        assert_eq!(workspaces.len(), 1);
    }
}
