//! Locating and loading the configuration file.

use std::path::{Path, PathBuf};

use crate::controller::Hermod;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "HERMOD_CONFIG";

/// Searched, in order, when neither the command line nor the environment names a file.
pub const DEFAULT_PATHS: [&str; 2] = ["./hermod.config.ron", "/etc/hermod/hermod.config.ron"];

/// Picks the configuration file using the following precedence:
/// 1. `cli`, the path given on the command line
/// 2. `env`, the value of `HERMOD_CONFIG`
/// 3. the first of `defaults` that exists
///
/// An explicitly named file must exist.
///
/// # Errors
/// If an explicit path does not exist, or none of the defaults do.
pub fn locate(
    cli: Option<PathBuf>,
    env: Option<PathBuf>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Configuration file does not exist: {}", path.display());
    }

    if let Some(path) = env {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - command line argument\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// [`locate`] with the real environment and default locations.
///
/// # Errors
/// See [`locate`].
pub fn find_config_file(cli: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let defaults = DEFAULT_PATHS.map(PathBuf::from);

    locate(cli, env, &defaults)
}

/// Reads and parses a configuration file.
///
/// # Errors
/// If the file cannot be read or is not a valid configuration.
pub fn load(path: &Path) -> anyhow::Result<Hermod> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        anyhow::anyhow!("Failed to read config from {}: {err}", path.display())
    })?;

    parse(&content).map_err(|err| anyhow::anyhow!("Invalid config in {}: {err}", path.display()))
}

/// # Errors
/// If `content` is not a valid configuration.
pub fn parse(content: &str) -> Result<Hermod, ron::error::SpannedError> {
    ron::from_str(content)
}
