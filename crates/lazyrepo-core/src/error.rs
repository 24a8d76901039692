//! Error types for lazyrepo

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using LazyError
pub type Result<T> = std::result::Result<T, LazyError>;

/// Main error type for lazyrepo operations
#[derive(Debug, Error)]
pub enum LazyError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Project-model errors
    #[error(transparent)]
    Project(#[from] ProjectError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Project-model errors
#[derive(Debug, Error)]
pub enum ProjectError {
    /// No workspace root found
    #[error("No monorepo root found at {0} (missing package.json workspaces)")]
    RootNotFound(PathBuf),

    /// Failed to parse a package manifest
    #[error("Failed to parse package manifest {path}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    /// Two workspaces claim the same name
    #[error("Duplicate workspace name '{name}' at {first} and {second}")]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Workspace lookup failed
    #[error("Unknown workspace: {0}")]
    UnknownWorkspace(String),

    /// Invalid package glob pattern
    #[error("Invalid workspace pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LazyError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
