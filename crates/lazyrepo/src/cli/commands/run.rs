//! Run command - execute scripts across the workspace

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;

use lazyrepo_core::Project;
use lazyrepo_tasks::scheduler::default_max_concurrent;
use lazyrepo_tasks::{
    RequestedTask, RunSummary, Scheduler, SchedulerOptions, TaskEvent, TaskGraph, TaskReporter,
    TracingReporter,
};

use crate::cli::{Cli, OutputFormat};

/// Run scripts across the workspace
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Scripts to run (e.g., build test lint)
    #[arg(required = true)]
    pub scripts: Vec<String>,

    /// Filter to workspaces matching a path or glob (can be repeated)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Run everything even when the cache is fresh
    #[arg(long)]
    pub force: bool,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Extra arguments appended to each script command
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd).context("Failed to load project")?;

        let requests: Vec<RequestedTask> = self
            .scripts
            .iter()
            .map(|script| RequestedTask {
                script: script.clone(),
                extra_args: self.args.clone(),
                force: self.force,
                filter_paths: self.filter.clone(),
            })
            .collect();

        let mut graph = TaskGraph::build(&project, &requests)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if graph.is_empty() {
            if !cli.quiet {
                println!("{} No tasks to run.", style("✓").green());
            }
            return Ok(());
        }

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!();
            println!(
                "{} {} task{}",
                style("→").blue(),
                graph.len(),
                if graph.len() == 1 { "" } else { "s" },
            );
            if cli.verbose {
                println!();
                println!("{}", graph.execution_plan());
            }
            println!();
        }

        let reporter: Arc<dyn TaskReporter> = if cli.quiet {
            Arc::new(TracingReporter)
        } else {
            Arc::new(ConsoleReporter::new(cli.verbose))
        };

        let options = SchedulerOptions {
            max_concurrent: self.concurrency.unwrap_or_else(default_max_concurrent),
        };
        let scheduler = Scheduler::new(options, reporter);
        let summary = scheduler.execute(&project, &mut graph).await;

        if cli.format == OutputFormat::Json {
            print_json_summary(&summary, &graph)?;
        } else if !cli.quiet {
            print_text_summary(&summary);
        }

        if !summary.is_success() {
            anyhow::bail!(
                "{} task{} failed",
                summary.failed.len(),
                if summary.failed.len() == 1 { "" } else { "s" }
            );
        }
        Ok(())
    }
}

fn print_text_summary(summary: &RunSummary) {
    println!();
    println!(
        "  {} {} successful, {} total, {}/{} cached",
        if summary.is_success() {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        },
        summary.succeeded(),
        summary.total,
        summary.lazy,
        summary.total,
    );

    if summary.fully_cached() {
        println!(
            "  {}",
            style(format!(
                ">>> {}/{} MAXIMUM LAZY",
                summary.lazy, summary.total
            ))
            .green()
            .bold()
        );
    }

    if !summary.failed.is_empty() {
        println!();
        println!("  {} failed:", style("✗").red().bold());
        for key in &summary.failed {
            println!("    {} {}", style("✗").red(), key);
        }
    }
    if !summary.not_run.is_empty() {
        println!();
        println!("  {} not run (upstream failed):", style("○").yellow());
        for key in &summary.not_run {
            println!("    {} {}", style("○").yellow(), key);
        }
    }
}

fn print_json_summary(summary: &RunSummary, graph: &TaskGraph) -> anyhow::Result<()> {
    let tasks: Vec<serde_json::Value> = graph
        .order()
        .iter()
        .filter_map(|key| graph.get(key))
        .map(|node| {
            serde_json::json!({
                "key": node.key.to_string(),
                "status": node.status.to_string(),
                "outputs": node.output_files,
            })
        })
        .collect();

    let doc = serde_json::json!({
        "total": summary.total,
        "succeeded": summary.succeeded(),
        "cached": summary.lazy,
        "failed": summary.failed.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "not_run": summary.not_run.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "duration_ms": summary.duration.as_millis(),
        "tasks": tasks,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { key, command } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(key).bold(),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output {
                key,
                line,
                is_stderr,
            } => {
                if *is_stderr {
                    println!("    {} {}", style(format!("[{}]", key)).red().dim(), line);
                } else {
                    println!("    {} {}", style(format!("[{}]", key)).dim(), line);
                }
            }
            TaskEvent::Completed {
                key,
                duration,
                cached,
            } => {
                if *cached {
                    println!(
                        "  {} {} {} {}",
                        style("✓").green(),
                        style(key).green(),
                        style("(cached)").cyan(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                } else {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(key).green(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                }
            }
            TaskEvent::Failed {
                key,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(key).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::StaleOutput { key, path } => {
                println!(
                    "  {} {} stale output removed: {}",
                    style("!").yellow(),
                    style(key).yellow(),
                    path
                );
            }
            TaskEvent::RunCompleted { .. } => {}
        }
    }
}
