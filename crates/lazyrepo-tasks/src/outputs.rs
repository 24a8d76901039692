//! Output capture and restoration
//!
//! After a successful run, the files matching a task's output patterns are
//! copied into the task's cache directory with their mtimes preserved, and
//! an output manifest records each file with its mtime. On a cache hit the
//! manifest drives restoration: missing files are copied back, files with
//! drifted mtimes are overwritten, and files matching the output patterns
//! that the manifest does not know are deleted as stale.

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::manifest::mtime_millis;
use crate::task::{display_rel, TaskConfig};

/// Errors in the output cache engine
#[derive(Debug, thiserror::Error)]
pub enum OutputCacheError {
    /// Invalid output glob pattern
    #[error("Invalid output pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// An output file resolved outside the project root
    #[error("Output file {path} is outside the project root")]
    OutsideRoot { path: PathBuf },

    /// No output manifest has been stored for this task
    #[error("No stored output manifest at {path}")]
    NoManifest { path: PathBuf },

    /// IO failure while copying or deleting outputs
    #[error("Output cache IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> OutputCacheError {
    let path = path.into();
    move |source| OutputCacheError::Io { path, source }
}

/// The stored listing of a task's output files with their mtimes,
/// path-sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputManifest {
    entries: Vec<(String, u64)>,
}

impl OutputManifest {
    /// Build from entries, sorting by path
    pub fn new(mut entries: Vec<(String, u64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// The sorted (path, mtime-millis) entries
    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    /// Whether a path is recorded
    pub fn contains(&self, path: &str) -> bool {
        self.entries.binary_search_by(|e| e.0.as_str().cmp(path)).is_ok()
    }

    /// Serialize as `path\tmtime` lines
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(path, mtime)| format!("{path}\t{mtime}\n"))
            .collect()
    }

    /// Parse a stored manifest
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let (path, mtime) = line.split_once('\t')?;
                Some((path.to_string(), mtime.parse().ok()?))
            })
            .collect();
        Self::new(entries)
    }
}

/// Result of restoring a task's outputs from cache
#[derive(Debug, Default)]
pub struct RestoreOutcome {
    /// Files copied back from the cache
    pub restored: Vec<String>,
    /// Files already present with the recorded mtime
    pub unchanged: Vec<String>,
    /// Stray files matching the output patterns that were deleted
    pub purged: Vec<String>,
}

impl RestoreOutcome {
    /// All files the task now owns on disk, path-sorted
    pub fn output_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .restored
            .iter()
            .chain(self.unchanged.iter())
            .cloned()
            .collect();
        files.sort();
        files
    }
}

/// Capture a task's outputs into its cache directory.
///
/// Replaces any previously cached outputs for the task and returns the
/// captured file list, project-root-relative and sorted.
pub fn capture_outputs(
    root: &Path,
    workspace_dir: &Path,
    config: &TaskConfig,
) -> Result<Vec<String>, OutputCacheError> {
    let files = resolve_output_files(root, workspace_dir, &config.outputs)?;

    if config.cache_dir.exists() {
        std::fs::remove_dir_all(&config.cache_dir).map_err(io_err(&config.cache_dir))?;
    }
    if config.output_manifest_path.exists() {
        std::fs::remove_file(&config.output_manifest_path)
            .map_err(io_err(&config.output_manifest_path))?;
    }

    let mut entries: Vec<(String, u64)> = Vec::new();
    for rel in &files {
        let src = root.join(rel);
        let dst = config.cache_dir.join(rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let metadata = std::fs::metadata(&src).map_err(io_err(&src))?;
        let mtime_ms = mtime_millis(&metadata);
        std::fs::copy(&src, &dst).map_err(io_err(&dst))?;
        set_mtime_millis(&dst, mtime_ms)?;

        entries.push((rel.clone(), mtime_ms));
    }

    // The manifest stream exists only once there is something to record.
    if !entries.is_empty() {
        write_output_manifest(&OutputManifest::new(entries), &config.output_manifest_path)?;
    }

    debug!(files = files.len(), "outputs captured");
    Ok(files)
}

/// Restore a task's outputs from its cache directory.
///
/// After restoration the on-disk file set matching the output patterns
/// equals the stored manifest's file set, with the recorded mtimes.
pub fn restore_outputs(
    root: &Path,
    workspace_dir: &Path,
    config: &TaskConfig,
) -> Result<RestoreOutcome, OutputCacheError> {
    let stored = read_output_manifest(&config.output_manifest_path)?;
    let current = resolve_output_files(root, workspace_dir, &config.outputs)?;

    let mut outcome = RestoreOutcome::default();

    // Stale sweep: files matching the output patterns but unknown to the
    // manifest are deleted.
    for rel in &current {
        if !stored.contains(rel) {
            let path = root.join(rel);
            std::fs::remove_file(&path).map_err(io_err(&path))?;
            warn!(path = %rel, "deleted stale output not present in cache");
            outcome.purged.push(rel.clone());
        }
    }

    for (rel, mtime_ms) in stored.entries() {
        let target = root.join(rel);
        let cached = config.cache_dir.join(rel);

        let on_disk_mtime = std::fs::metadata(&target).ok().map(|m| mtime_millis(&m));
        match on_disk_mtime {
            Some(current_mtime) if current_mtime == *mtime_ms => {
                outcome.unchanged.push(rel.clone());
            }
            _ => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err(parent))?;
                }
                std::fs::copy(&cached, &target).map_err(io_err(&cached))?;
                set_mtime_millis(&target, *mtime_ms)?;
                outcome.restored.push(rel.clone());
            }
        }
    }

    debug!(
        restored = outcome.restored.len(),
        unchanged = outcome.unchanged.len(),
        purged = outcome.purged.len(),
        "outputs restored"
    );
    Ok(outcome)
}

/// Resolve a task's output patterns to a sorted, root-relative file list.
///
/// Patterns are workspace-relative by default; absolute patterns and the
/// `<rootDir>/` prefix are honored. Any file outside the project root is a
/// hard error.
pub fn resolve_output_files(
    root: &Path,
    workspace_dir: &Path,
    patterns: &[String],
) -> Result<Vec<String>, OutputCacheError> {
    let mut files: Vec<String> = Vec::new();

    for pattern in patterns {
        let full = if let Some(rest) = pattern.strip_prefix("<rootDir>/") {
            root.join(rest).to_string_lossy().to_string()
        } else if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            workspace_dir.join(pattern).to_string_lossy().to_string()
        };

        let entries = glob::glob(&full).map_err(|e| OutputCacheError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        for entry in entries.flatten() {
            if !entry.is_file() {
                continue;
            }
            if entry.strip_prefix(root).is_err() {
                return Err(OutputCacheError::OutsideRoot { path: entry });
            }
            files.push(display_rel(root, &entry));
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn read_output_manifest(path: &Path) -> Result<OutputManifest, OutputCacheError> {
    if !path.exists() {
        return Err(OutputCacheError::NoManifest {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(io_err(path))?;
    Ok(OutputManifest::parse(&content))
}

fn write_output_manifest(
    manifest: &OutputManifest,
    path: &Path,
) -> Result<(), OutputCacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let tmp = path.with_extension("tsv.tmp");
    std::fs::write(&tmp, manifest.serialize()).map_err(io_err(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

fn set_mtime_millis(path: &Path, mtime_ms: u64) -> Result<(), OutputCacheError> {
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .map_err(io_err(path))?;
    file.set_modified(UNIX_EPOCH + Duration::from_millis(mtime_ms))
        .map_err(io_err(path))?;
    Ok(())
}
