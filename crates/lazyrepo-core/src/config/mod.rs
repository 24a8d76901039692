//! Configuration loading and types

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::{find_config, load_config, load_config_from_root, load_config_or_default};
pub use types::{
    BaseCacheConfig, CacheRules, Config, ExecutionMode, RunScope, RunsAfterConfig, ScriptConfig,
};
