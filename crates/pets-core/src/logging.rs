//! Tracing output for programs embedding pets.
//!
//! Library code only emits `tracing` events; installing a subscriber is up to
//! the binary, once, before it opens the registry:
//!
//! ```no_run
//! use pets_core::{Registry, logging};
//!
//! # fn main() -> anyhow::Result<()> {
//! // `--verbose` on the command line lowers the default; PETS_LOG still wins.
//! logging::init_with_default(tracing::Level::DEBUG);
//! let registry = Registry::open_default()?;
//! # let _ = registry;
//! # Ok(())
//! # }
//! ```

use std::sync::OnceLock;
use tracing::Level;

/// Environment variable naming the log level (`trace` .. `error`).
pub const PETS_LOG_ENV: &str = "PETS_LOG";

static INIT: OnceLock<()> = OnceLock::new();

fn parse_level(raw: Option<&str>, default: Level) -> Level {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => default,
    }
}

/// Install a stderr subscriber at the `PETS_LOG` level, `info` if unset.
pub fn init() {
    init_with_default(Level::INFO);
}

/// Like [`init`], with `default` used when `PETS_LOG` is unset or unreadable.
///
/// Only the first call in a process installs anything; a subscriber set by
/// the embedder beforehand is left alone.
pub fn init_with_default(default: Level) {
    INIT.get_or_init(|| {
        let level = parse_level(std::env::var(PETS_LOG_ENV).ok().as_deref(), default);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
