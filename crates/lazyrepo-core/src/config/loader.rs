//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    debug!(path = %path.display(), scripts = config.scripts.len(), "config loaded");
    Ok(config)
}

/// Find a configuration file at the project root. The first name in
/// priority order wins.
pub fn find_config(root: &Path) -> Option<PathBuf> {
    for name in config_file_names() {
        let config_path = root.join(name);
        if config_path.exists() {
            debug!(path = %config_path.display(), "found config file");
            return Some(config_path);
        }
    }
    None
}

/// Load configuration from the project root
pub fn load_config_from_root(root: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(root).ok_or_else(|| ConfigError::NotFound(root.to_path_buf()))?;
    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

/// Load configuration or use defaults
pub fn load_config_or_default(root: &Path) -> (Config, Option<PathBuf>) {
    match load_config_from_root(root) {
        Ok((config, path)) => (config, Some(path)),
        Err(_) => {
            warn!(root = %root.display(), "no config found, using defaults");
            (Config::default(), None)
        }
    }
}
