//! Tracing subscriber setup for the CLI.
//!
//! `RUST_LOG` wins over the configured level when it is set.

use tracing_subscriber::{fmt, EnvFilter};

/// Builds the filter: `RUST_LOG` if present, otherwise `level` for this crate.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("labdeck={level},warn")))
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init(level: &str, json: bool) {
    let builder = fmt().with_env_filter(env_filter(level)).with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
