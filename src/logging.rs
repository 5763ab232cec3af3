//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is left
//! to the embedding application. [`init`] is a convenience that installs a
//! `fmt` subscriber filtered by the configured level, or by `DEDUCTIVE_LOG`
//! when that variable is set.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "DEDUCTIVE_LOG";

/// Filter directive for `config`, with `DEDUCTIVE_LOG` taking precedence.
pub fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global subscriber. Returns `false` if one was already set.
pub fn init(config: &LoggingConfig) -> bool {
    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter_for(config))
            .with_target(true)
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if config.format == "json" {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
