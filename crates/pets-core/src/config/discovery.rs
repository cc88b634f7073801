//! Configuration discovery and resolution

use super::types::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Explicit overrides, usually from command-line flags
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub health_interval_ms: Option<u64>,
    pub lock_retries: Option<u32>,
    /// Path to a config file used instead of the user config
    pub config_path: Option<PathBuf>,
}

/// A config file as written on disk. Every field is optional so that a file
/// only overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    health: FileHealth,
    #[serde(default)]
    registry: FileRegistry,
    #[serde(default)]
    script: FileScript,
}

#[derive(Debug, Default, Deserialize)]
struct FileHealth {
    interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRegistry {
    lock_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileScript {
    file_name: Option<String>,
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (`PETS_HEALTH_INTERVAL_MS`, `PETS_LOCK_RETRIES`)
/// 3. Project-local config (.pets.toml in current dir or a parent, up to the git root)
/// 4. User config (<pets_home>/config.toml, or `overrides.config_path`)
/// 5. Defaults
///
/// Unparseable files are logged and skipped rather than failing resolution.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
    pets_home: &Path,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    let user_config_path = overrides
        .config_path
        .clone()
        .unwrap_or_else(|| pets_home.join("config.toml"));
    if user_config_path.exists() {
        match load_config_file(&user_config_path) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse config at {user_config_path:?}: {e}"),
        }
    }

    if let Some(project_config) = find_project_config(current_dir) {
        match load_config_file(&project_config) {
            Ok(file_config) => merge_config(&mut config, file_config),
            Err(e) => warn!("Failed to parse project config at {project_config:?}: {e}"),
        }
    }

    apply_env_overrides(&mut config);
    apply_overrides(&mut config, overrides);

    debug!(?config, "resolved pets configuration");
    Ok(config)
}

/// Search the current directory and its parents, stopping at the git root.
fn find_project_config(current_dir: &Path) -> Option<PathBuf> {
    let mut dir = current_dir;

    loop {
        let config_path = dir.join(".pets.toml");
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&contents)?;
    Ok(config)
}

fn merge_config(base: &mut Config, file: FileConfig) {
    if let Some(interval_ms) = file.health.interval_ms {
        base.health.interval_ms = interval_ms;
    }
    if let Some(retries) = file.registry.lock_retries {
        base.registry.lock_retries = retries;
    }
    if let Some(name) = file.script.file_name {
        base.script.file_name = name;
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(ms) = env_number::<u64>("PETS_HEALTH_INTERVAL_MS") {
        config.health.interval_ms = ms;
    }
    if let Some(retries) = env_number::<u32>("PETS_LOCK_RETRIES") {
        config.registry.lock_retries = retries;
    }
}

fn env_number<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {var}={raw:?}: not a number");
            None
        }
    }
}

fn apply_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(ms) = overrides.health_interval_ms {
        config.health.interval_ms = ms;
    }
    if let Some(retries) = overrides.lock_retries {
        config.registry.lock_retries = retries;
    }
}
