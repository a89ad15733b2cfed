//! Configuration loading and schema definitions for fanout.
//!
//! Dispatch settings are loaded from TOML, either from a file or a string.
//! See [`schema`] for the full set of fields and their defaults.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads fanout configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// does not match the expected schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads fanout configuration from a TOML string.
///
/// Useful for testing or generating configuration programmatically.
///
/// # Example
///
/// ```
/// use fanout::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [dispatch]
///     topology = "replicated"
///     max_retries = 1
/// "#)?;
///
/// assert_eq!(config.dispatch.max_retries, 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
