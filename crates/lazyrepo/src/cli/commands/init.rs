//! Init command - write a starter configuration

use clap::Args;
use console::style;

use crate::cli::{output, Cli};

const STARTER_CONFIG: &str = r#"# lazyrepo configuration
# Scripts not listed here run with defaults: dependent execution,
# every workspace file as input, nothing cached as output.

[scripts.build]
execution = "dependent"

[scripts.build.cache]
inputs = ["src/**/*", "package.json"]
outputs = ["dist/**/*"]

# [scripts.test.runs_after.build]
# in = "self-and-dependencies"
# uses_output = true
"#;

/// Write a starter lazy.config.toml
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join("lazy.config.toml");

        if path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }

        std::fs::write(&path, STARTER_CONFIG)?;
        if !cli.quiet {
            output::success(&format!("Wrote {}", style(path.display()).cyan()));
        }
        Ok(())
    }
}
