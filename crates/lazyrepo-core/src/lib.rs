//! lazyrepo-core - project model and configuration
//!
//! This crate loads the monorepo (root detection, workspace discovery,
//! local dependency edges) and the `lazy.config.*` configuration, and
//! exposes the lookup interface the task engine is built on.

pub mod config;
pub mod error;
pub mod project;

pub use config::{Config, ExecutionMode, RunScope, ScriptConfig};
pub use error::{LazyError, Result};
pub use project::{Project, Workspace};
