//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Explicit overrides (passed as parameters)
//! 2. Environment variables
//! 3. Project-local config (.pets.toml)
//! 4. User config (<pets_home>/config.toml)
//! 5. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, resolve_config};
pub use types::{Config, HealthConfig, RegistryConfig, ScriptConfig};
