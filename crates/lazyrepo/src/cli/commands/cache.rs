//! Cache management command

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use clap::{Args, Subcommand};
use console::style;

use lazyrepo_core::config::defaults::STATE_DIR;
use lazyrepo_core::Project;

use crate::cli::{output, Cli, OutputFormat};

/// Local cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache contents and sizes
    Status(CacheStatusCommand),
    /// Remove all cached state
    Clean(CacheCleanCommand),
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Clear all cached state
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.action {
            CacheAction::Status(cmd) => cmd.execute(cli),
            CacheAction::Clean(cmd) => cmd.execute(cli),
        }
    }
}

/// One task's persisted state on disk
struct CacheEntry {
    workspace: String,
    script: String,
    size_bytes: u64,
    modified: Option<DateTime<Local>>,
}

fn collect_entries(project: &Project) -> Vec<CacheEntry> {
    let mut entries = Vec::new();

    for workspace in project.workspaces_by_dir().values() {
        let state_dir = workspace.dir.join(STATE_DIR);
        let Ok(scripts) = std::fs::read_dir(&state_dir) else {
            continue;
        };
        for script_dir in scripts.flatten() {
            if !script_dir.path().is_dir() {
                continue;
            }
            let modified = std::fs::metadata(script_dir.path().join("manifest.tsv"))
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::from);
            entries.push(CacheEntry {
                workspace: workspace.name.clone(),
                script: script_dir.file_name().to_string_lossy().to_string(),
                size_bytes: dir_size(&script_dir.path()),
                modified,
            });
        }
    }

    entries.sort_by(|a, b| (&a.workspace, &a.script).cmp(&(&b.workspace, &b.script)));
    entries
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

fn formatted_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd)?;
        let entries = collect_entries(&project);
        let total: u64 = entries.iter().map(|e| e.size_bytes).sum();

        if cli.format == OutputFormat::Json {
            let doc = serde_json::json!({
                "entries": entries.iter().map(|e| {
                    serde_json::json!({
                        "workspace": e.workspace,
                        "script": e.script,
                        "size_bytes": e.size_bytes,
                    })
                }).collect::<Vec<_>>(),
                "total_size_bytes": total,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else if !cli.quiet {
            println!("{}", style("Cache Status").bold());
            println!();
            if entries.is_empty() {
                println!("  (empty)");
            }
            for entry in &entries {
                let when = entry
                    .modified
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:30} {:>10}  {}",
                    style(format!("{}:{}", entry.workspace, entry.script)).cyan(),
                    formatted_size(entry.size_bytes),
                    style(when).dim(),
                );
            }
            println!();
            println!("  Total: {}", style(formatted_size(total)).yellow());
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd)?;

        let state_dirs: Vec<PathBuf> = project
            .workspaces_by_dir()
            .values()
            .map(|w| w.dir.join(STATE_DIR))
            .filter(|p| p.exists())
            .collect();

        if state_dirs.is_empty() {
            if !cli.quiet {
                output::success("Nothing cached.");
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove cached state in {} workspace{}?",
                    state_dirs.len(),
                    if state_dirs.len() == 1 { "" } else { "s" }
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                output::warning("Aborted.");
                return Ok(());
            }
        }

        for dir in &state_dirs {
            std::fs::remove_dir_all(dir)?;
        }

        if !cli.quiet {
            output::success(&format!(
                "Cleared cached state in {} workspace{}",
                state_dirs.len(),
                if state_dirs.len() == 1 { "" } else { "s" }
            ));
        }

        Ok(())
    }
}
