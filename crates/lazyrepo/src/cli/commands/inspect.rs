//! Inspect command - show the task graph without running it

use clap::Args;

use lazyrepo_core::Project;
use lazyrepo_tasks::{RequestedTask, TaskGraph};

use crate::cli::{output, Cli, OutputFormat};

/// Show the resolved task graph in topological order
#[derive(Debug, Args)]
pub struct InspectCommand {
    /// Scripts to expand
    #[arg(required = true)]
    pub scripts: Vec<String>,

    /// Filter to workspaces matching a path or glob (can be repeated)
    #[arg(long)]
    pub filter: Vec<String>,
}

impl InspectCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd)?;

        let requests: Vec<RequestedTask> = self
            .scripts
            .iter()
            .map(|script| RequestedTask {
                script: script.clone(),
                filter_paths: self.filter.clone(),
                ..Default::default()
            })
            .collect();

        let graph =
            TaskGraph::build(&project, &requests).map_err(|e| anyhow::anyhow!("{}", e))?;

        if cli.format == OutputFormat::Json {
            let tasks: Vec<serde_json::Value> = graph
                .order()
                .iter()
                .filter_map(|key| graph.get(key))
                .map(|node| {
                    serde_json::json!({
                        "key": node.key.to_string(),
                        "command": node.command,
                        "deps": node.deps.iter().map(|d| d.key.to_string()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&tasks)?);
            return Ok(());
        }

        if graph.is_empty() {
            output::success("No matching tasks.");
            return Ok(());
        }

        output::info(&format!(
            "{} task{}",
            graph.len(),
            if graph.len() == 1 { "" } else { "s" }
        ));
        println!();
        print!("{}", graph.execution_plan());
        Ok(())
    }
}
