//! Canonical home directory resolution for pets
//!
//! Everything pets persists (the process registry, per-service logs and the
//! user config file) lives below one directory so that separate invocations
//! agree on what is running.
//!
//! # Precedence
//!
//! 1. `PETS_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()/.pets`
//!
//! # Testing
//!
//! Tests that touch the default location MUST set `PETS_HOME` to a temporary
//! directory and run under `#[serial]`.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable that overrides the pets home directory.
pub const PETS_HOME_ENV: &str = "PETS_HOME";

/// Get the home directory for pets state.
///
/// # Errors
///
/// Returns an error if `PETS_HOME` is not set and the platform home directory
/// cannot be determined.
pub fn get_pets_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(PETS_HOME_ENV) {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".pets"))
        .context("Could not determine home directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn with_pets_home<F: FnOnce()>(value: Option<&str>, f: F) {
        let original = env::var(PETS_HOME_ENV).ok();
        unsafe {
            match value {
                Some(v) => env::set_var(PETS_HOME_ENV, v),
                None => env::remove_var(PETS_HOME_ENV),
            }
        }

        f();

        unsafe {
            match original {
                Some(v) => env::set_var(PETS_HOME_ENV, v),
                None => env::remove_var(PETS_HOME_ENV),
            }
        }
    }

    #[test]
    #[serial]
    fn test_pets_home_set() {
        with_pets_home(Some("/custom/pets"), || {
            assert_eq!(get_pets_home().unwrap(), PathBuf::from("/custom/pets"));
        });
    }

    #[test]
    #[serial]
    fn test_pets_home_not_set_uses_platform_default() {
        with_pets_home(None, || {
            let expected = dirs::home_dir().unwrap().join(".pets");
            assert_eq!(get_pets_home().unwrap(), expected);
        });
    }

    #[test]
    #[serial]
    fn test_pets_home_whitespace_only_uses_platform_default() {
        with_pets_home(Some("   "), || {
            let expected = dirs::home_dir().unwrap().join(".pets");
            assert_eq!(get_pets_home().unwrap(), expected);
        });
    }

    #[test]
    #[serial]
    fn test_pets_home_is_trimmed() {
        with_pets_home(Some("  /custom/pets  "), || {
            assert_eq!(get_pets_home().unwrap(), PathBuf::from("/custom/pets"));
        });
    }
}
