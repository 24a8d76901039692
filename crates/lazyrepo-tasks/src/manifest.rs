//! Input manifest computation and fingerprinting
//!
//! A task's input manifest is a sorted, tab-separated document listing
//! everything that determines its outputs: upstream task fingerprints,
//! input files with content hashes and mtimes, and environment variables.
//! The sha256 of the serialized manifest is the task's cache key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::task::{display_rel, TaskConfig, UpstreamTask};

/// Errors while computing or persisting a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Invalid input glob pattern
    #[error("Invalid input pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Failed to read an input file
    #[error("Failed to read input {path}: {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to persist the manifest
    #[error("Failed to write manifest {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One typed line of an input manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    /// An upstream task and its input-manifest fingerprint
    Upstream { key: String, fingerprint: String },
    /// An input file with content hash and mtime in integer milliseconds
    File {
        path: String,
        hash: String,
        mtime_ms: u64,
    },
    /// An environment variable and the hash of its value
    Env { name: String, value_hash: String },
}

impl ManifestLine {
    fn group(&self) -> u8 {
        match self {
            Self::Upstream { .. } => 0,
            Self::File { .. } => 1,
            Self::Env { .. } => 2,
        }
    }

    fn identifier(&self) -> &str {
        match self {
            Self::Upstream { key, .. } => key,
            Self::File { path, .. } => path,
            Self::Env { name, .. } => name,
        }
    }

    fn serialize(&self) -> String {
        match self {
            Self::Upstream { key, fingerprint } => {
                format!("upstream\t{key}\t{fingerprint}\n")
            }
            Self::File {
                path,
                hash,
                mtime_ms,
            } => format!("file\t{path}\t{hash}\t{mtime_ms}\n"),
            Self::Env { name, value_hash } => format!("env\t{name}\t{value_hash}\n"),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split('\t');
        match fields.next()? {
            "upstream" => Some(Self::Upstream {
                key: fields.next()?.to_string(),
                fingerprint: fields.next()?.to_string(),
            }),
            "file" => Some(Self::File {
                path: fields.next()?.to_string(),
                hash: fields.next()?.to_string(),
                mtime_ms: fields.next()?.parse().ok()?,
            }),
            "env" => Some(Self::Env {
                name: fields.next()?.to_string(),
                value_hash: fields.next()?.to_string(),
            }),
            _ => None,
        }
    }
}

/// A complete, deterministically ordered input manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputManifest {
    lines: Vec<ManifestLine>,
}

impl InputManifest {
    /// Build a manifest, sorting lines into their canonical order:
    /// upstream lines first (by key), then files (by path), then env
    /// variables (by name).
    pub fn new(mut lines: Vec<ManifestLine>) -> Self {
        lines.sort_by(|a, b| {
            a.group()
                .cmp(&b.group())
                .then_with(|| a.identifier().cmp(b.identifier()))
        });
        Self { lines }
    }

    /// The sorted lines
    pub fn lines(&self) -> &[ManifestLine] {
        &self.lines
    }

    /// Serialize as tab-separated, newline-terminated lines
    pub fn serialize(&self) -> String {
        self.lines.iter().map(ManifestLine::serialize).collect()
    }

    /// The manifest fingerprint: sha256 of the serialized bytes
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.serialize().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Parse a previously persisted manifest. Unknown lines are dropped.
    pub fn parse(content: &str) -> Self {
        let lines = content.lines().filter_map(ManifestLine::parse).collect();
        Self { lines }
    }
}

/// Compute the input manifest for one task.
///
/// `global_files` is the baseline (lockfile and config files) and only
/// applies when the task inherits the base cache. `upstreams` holds the
/// completed dependencies: every one contributes an `upstream` fingerprint
/// line, and those flagged `uses_output` additionally contribute their
/// output files as input files.
pub fn compute_manifest(
    root: &Path,
    workspace_dir: &Path,
    config: &TaskConfig,
    top_level: bool,
    global_files: &[PathBuf],
    upstreams: &[UpstreamTask],
) -> Result<InputManifest, ManifestError> {
    let previous = read_previous(&config.manifest_path);

    let mut files: Vec<PathBuf> = Vec::new();

    if config.inherits_base {
        for path in global_files {
            if path.is_file() {
                files.push(path.clone());
            }
        }
    }

    let base_dir = if top_level { root } else { workspace_dir };
    for pattern in &config.inputs {
        expand_pattern(pattern, base_dir, &mut files)?;
    }

    let excludes = compile_excludes(&config.exclude, base_dir)?;
    files.retain(|path| !is_excluded(path, &excludes));
    files.sort();
    files.dedup();

    let mut lines: Vec<ManifestLine> = Vec::new();
    let mut hashed = 0usize;
    let mut reused = 0usize;

    for path in &files {
        lines.push(file_line(root, path, &previous, &mut hashed, &mut reused)?);
    }

    for upstream in upstreams {
        lines.push(ManifestLine::Upstream {
            key: upstream.key.to_string(),
            fingerprint: upstream.fingerprint.clone(),
        });

        if !upstream.uses_output {
            continue;
        }
        for rel in &upstream.output_files {
            let path = root.join(rel);
            if !path.is_file() {
                continue;
            }
            lines.push(file_line(root, &path, &previous, &mut hashed, &mut reused)?);
        }
    }

    for name in &config.env_inputs {
        let value_hash = match std::env::var(name) {
            Ok(value) => {
                let mut hasher = Sha256::new();
                hasher.update(value.as_bytes());
                format!("{:x}", hasher.finalize())
            }
            Err(_) => "unset".to_string(),
        };
        lines.push(ManifestLine::Env {
            name: name.clone(),
            value_hash,
        });
    }

    debug!(
        files = files.len(),
        hashed, reused, "input manifest computed"
    );
    Ok(InputManifest::new(lines))
}

/// Persist a manifest atomically: temp file in the same directory, then
/// rename over the target.
pub fn persist_manifest(manifest: &InputManifest, path: &Path) -> Result<(), ManifestError> {
    let persist_err = |source| ManifestError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(persist_err)?;
    }
    let tmp = path.with_extension("tsv.tmp");
    std::fs::write(&tmp, manifest.serialize()).map_err(persist_err)?;
    std::fs::rename(&tmp, path).map_err(persist_err)?;
    Ok(())
}

/// Fingerprint of the previously persisted manifest, if one exists
pub fn previous_fingerprint(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(format!("{:x}", hasher.finalize()))
}

/// Path components never treated as task inputs
const PRUNED_DIRS: &[&str] = &[".lazy", "node_modules", ".git"];

fn read_previous(path: &Path) -> BTreeMap<String, (String, u64)> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    InputManifest::parse(&content)
        .lines()
        .iter()
        .filter_map(|line| match line {
            ManifestLine::File {
                path,
                hash,
                mtime_ms,
            } => Some((path.clone(), (hash.clone(), *mtime_ms))),
            _ => None,
        })
        .collect()
}

fn expand_pattern(
    pattern: &str,
    base_dir: &Path,
    files: &mut Vec<PathBuf>,
) -> Result<(), ManifestError> {
    let full = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        base_dir.join(pattern).to_string_lossy().to_string()
    };

    let entries = glob::glob(&full).map_err(|e| ManifestError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    for entry in entries.flatten() {
        if entry.is_file() {
            files.push(entry);
        }
    }
    Ok(())
}

fn compile_excludes(patterns: &[String], base_dir: &Path) -> Result<Vec<Pattern>, ManifestError> {
    patterns
        .iter()
        .map(|pattern| {
            let full = if Path::new(pattern).is_absolute() {
                pattern.clone()
            } else {
                base_dir.join(pattern).to_string_lossy().to_string()
            };
            Pattern::new(&full).map_err(|e| ManifestError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn is_excluded(path: &Path, excludes: &[Pattern]) -> bool {
    if path
        .components()
        .any(|c| PRUNED_DIRS.contains(&c.as_os_str().to_string_lossy().as_ref()))
    {
        return true;
    }
    excludes.iter().any(|pattern| pattern.matches_path(path))
}

/// Build the `file` line for one input, reusing the previously recorded
/// hash when the mtime is unchanged.
fn file_line(
    root: &Path,
    path: &Path,
    previous: &BTreeMap<String, (String, u64)>,
    hashed: &mut usize,
    reused: &mut usize,
) -> Result<ManifestLine, ManifestError> {
    let read_err = |source| ManifestError::ReadInput {
        path: path.to_path_buf(),
        source,
    };

    let metadata = std::fs::metadata(path).map_err(read_err)?;
    let mtime_ms = mtime_millis(&metadata);
    let rel = display_rel(root, path);

    let hash = match previous.get(&rel) {
        Some((hash, prev_mtime)) if *prev_mtime == mtime_ms => {
            *reused += 1;
            hash.clone()
        }
        _ => {
            let bytes = std::fs::read(path).map_err(read_err)?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            *hashed += 1;
            format!("{:x}", hasher.finalize())
        }
    };

    Ok(ManifestLine::File {
        path: rel,
        hash,
        mtime_ms,
    })
}

/// File mtime in integer milliseconds since the epoch
pub fn mtime_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::task::{TaskConfig, TaskKey};
    use lazyrepo_core::config::ExecutionMode;

    fn config_for(workspace: &Path, inputs: Vec<String>, exclude: Vec<String>) -> TaskConfig {
        let state = workspace.join(".lazy/build");
        TaskConfig {
            execution: ExecutionMode::Independent,
            parallel: true,
            runs_after: Vec::new(),
            inputs,
            exclude,
            outputs: Vec::new(),
            env_inputs: Vec::new(),
            inherits_base: true,
            uses_output_from_dependencies: true,
            base_command: None,
            manifest_path: state.join("manifest.tsv"),
            output_manifest_path: state.join("output-manifest.tsv"),
            cache_dir: state.join("output"),
            log_path: state.join("output.log"),
        }
    }

    #[test]
    fn test_serialization_is_sorted_and_stable() {
        let manifest = InputManifest::new(vec![
            ManifestLine::Env {
                name: "NODE_ENV".into(),
                value_hash: "unset".into(),
            },
            ManifestLine::File {
                path: "b.txt".into(),
                hash: "beef".into(),
                mtime_ms: 2,
            },
            ManifestLine::File {
                path: "a.txt".into(),
                hash: "dead".into(),
                mtime_ms: 1,
            },
            ManifestLine::Upstream {
                key: "codegen::packages/core".into(),
                fingerprint: "f00d".into(),
            },
        ]);

        let serialized = manifest.serialize();
        assert_eq!(
            serialized,
            "upstream\tcodegen::packages/core\tf00d\n\
             file\ta.txt\tdead\t1\n\
             file\tb.txt\tbeef\t2\n\
             env\tNODE_ENV\tunset\n"
        );

        // Round-trips and re-fingerprints identically.
        let parsed = InputManifest::parse(&serialized);
        assert_eq!(parsed.fingerprint(), manifest.fingerprint());
    }

    #[test]
    fn test_compute_hashes_workspace_files() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("packages/core");
        std::fs::create_dir_all(ws.join("src")).unwrap();
        std::fs::write(ws.join("src/index.ts"), "export {}").unwrap();
        std::fs::write(ws.join("readme.md"), "# core").unwrap();

        let config = config_for(&ws, vec!["**/*".into()], vec![]);
        let manifest =
            compute_manifest(temp.path(), &ws, &config, false, &[], &[]).unwrap();

        let paths: Vec<&str> = manifest
            .lines()
            .iter()
            .filter_map(|l| match l {
                ManifestLine::File { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            paths,
            vec!["packages/core/readme.md", "packages/core/src/index.ts"]
        );
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("input.txt"), "one").unwrap();

        let config = config_for(&ws, vec!["**/*".into()], vec![]);
        let first = compute_manifest(temp.path(), &ws, &config, false, &[], &[])
            .unwrap()
            .fingerprint();

        std::fs::write(ws.join("input.txt"), "two").unwrap();
        let second = compute_manifest(temp.path(), &ws, &config, false, &[], &[])
            .unwrap()
            .fingerprint();

        assert_ne!(first, second);
    }

    #[test]
    fn test_exclude_and_pruned_dirs() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(ws.join("node_modules/dep")).unwrap();
        std::fs::create_dir_all(ws.join(".lazy/build")).unwrap();
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("node_modules/dep/index.js"), "x").unwrap();
        std::fs::write(ws.join(".lazy/build/manifest.tsv"), "x").unwrap();
        std::fs::write(ws.join("keep.txt"), "keep").unwrap();
        std::fs::write(ws.join("skip.log"), "skip").unwrap();

        let config = config_for(&ws, vec!["**/*".into()], vec!["**/*.log".into()]);
        let manifest =
            compute_manifest(temp.path(), &ws, &config, false, &[], &[]).unwrap();

        let paths: Vec<&str> = manifest
            .lines()
            .iter()
            .filter_map(|l| match l {
                ManifestLine::File { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(paths, vec!["pkg/keep.txt"]);
    }

    #[test]
    fn test_upstream_lines_without_output_files() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(temp.path().join("dep-out.txt"), "artifact").unwrap();

        let config = config_for(&ws, vec![], vec![]);
        let upstream = UpstreamTask {
            key: TaskKey::new("build", "dep"),
            fingerprint: "abc123".into(),
            output_files: vec!["dep-out.txt".into()],
            uses_output: false,
        };

        let manifest =
            compute_manifest(temp.path(), &ws, &config, false, &[], &[upstream]).unwrap();

        // The upstream fingerprint line is present even though its output
        // files are not inputs.
        assert!(manifest.lines().iter().any(|l| matches!(
            l,
            ManifestLine::Upstream { key, fingerprint } if key == "build::dep" && fingerprint == "abc123"
        )));
        assert!(!manifest
            .lines()
            .iter()
            .any(|l| matches!(l, ManifestLine::File { .. })));
    }

    #[test]
    fn test_upstream_outputs_become_file_lines() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(temp.path().join("dep-out.txt"), "artifact").unwrap();

        let config = config_for(&ws, vec![], vec![]);
        let upstream = UpstreamTask {
            key: TaskKey::new("build", "dep"),
            fingerprint: "abc123".into(),
            output_files: vec!["dep-out.txt".into()],
            uses_output: true,
        };

        let manifest =
            compute_manifest(temp.path(), &ws, &config, false, &[], &[upstream]).unwrap();

        assert!(manifest.lines().iter().any(|l| matches!(
            l,
            ManifestLine::File { path, .. } if path == "dep-out.txt"
        )));
    }

    #[test]
    fn test_hash_reuse_on_matching_mtime() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join("input.txt"), "same").unwrap();

        let config = config_for(&ws, vec!["**/*".into()], vec![]);
        let first = compute_manifest(temp.path(), &ws, &config, false, &[], &[]).unwrap();
        persist_manifest(&first, &config.manifest_path).unwrap();

        // Unchanged mtime: the recorded hash is inherited and the
        // fingerprint is identical.
        let second = compute_manifest(temp.path(), &ws, &config, false, &[], &[]).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_persist_is_atomic_and_readable() {
        let temp = TempDir::new().unwrap();
        let manifest = InputManifest::new(vec![ManifestLine::File {
            path: "a.txt".into(),
            hash: "cafe".into(),
            mtime_ms: 7,
        }]);

        let path = temp.path().join(".lazy/build/manifest.tsv");
        persist_manifest(&manifest, &path).unwrap();

        assert_eq!(previous_fingerprint(&path), Some(manifest.fingerprint()));
        assert!(!path.with_extension("tsv.tmp").exists());
    }

    #[test]
    fn test_global_files_respected_only_with_base() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("pkg");
        std::fs::create_dir_all(&ws).unwrap();
        let lockfile = temp.path().join("pnpm-lock.yaml");
        std::fs::write(&lockfile, "lockfileVersion: 9").unwrap();

        let mut config = config_for(&ws, vec![], vec![]);
        let globals = vec![lockfile];

        let with_base =
            compute_manifest(temp.path(), &ws, &config, false, &globals, &[]).unwrap();
        assert_eq!(with_base.lines().len(), 1);

        config.inherits_base = false;
        let without_base =
            compute_manifest(temp.path(), &ws, &config, false, &globals, &[]).unwrap();
        assert!(without_base.lines().is_empty());
    }
}
