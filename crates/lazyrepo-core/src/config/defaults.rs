//! Configuration defaults

/// Configuration file names searched at the project root, in priority order
pub fn config_file_names() -> &'static [&'static str] {
    &["lazy.config.toml", "lazy.config.yaml"]
}

/// Glob matching any configuration file at the project root.
///
/// Every cached task depends on the configuration, so the manifest engine
/// records whichever variant is present.
pub const CONFIG_FILE_GLOB: &str = "lazy.config.*";

/// Package-manager lockfiles recognized at the project root, in priority order
pub fn lockfile_names() -> &'static [&'static str] {
    &[
        "pnpm-lock.yaml",
        "yarn.lock",
        "package-lock.json",
        "bun.lockb",
    ]
}

/// Default input pattern for a workspace task with no explicit includes
pub const DEFAULT_INPUT_PATTERN: &str = "**/*";

/// Directory under each workspace holding persisted task state
pub const STATE_DIR: &str = ".lazy";
