//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub script: ScriptConfig,
}

/// Health gate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Poll interval for liveness and TCP probes, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    100
}

/// Process registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How many times to retry the registry file lock before giving up
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_retries: default_lock_retries(),
        }
    }
}

fn default_lock_retries() -> u32 {
    5
}

/// Script engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// File name looked up when a directory is loaded
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            file_name: default_file_name(),
        }
    }
}

fn default_file_name() -> String {
    "Petsfile".to_string()
}
