// Tracing initialization with a reloadable log level.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

fn filter_for(level: &str) -> EnvFilter {
    // RUST_LOG wins over the configured level.
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

pub fn init_tracing(logging: &LoggingConfig) {
    let (reload_layer, handle) = reload::Layer::new(filter_for(&logging.level));
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let json_layer = logging.json.then(|| fmt::layer().json());
    let text_layer = (!logging.json).then(fmt::layer);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init();
}

/// Apply a new logging level at runtime if tracing was initialized here.
pub fn apply_logging_level(level: &str) {
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = EnvFilter::new(level);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_can_be_changed_after_init() {
        init_tracing(&LoggingConfig::default());
        assert!(LOG_RELOAD_HANDLE.get().is_some());

        apply_logging_level("debug");
        let current = LOG_RELOAD_HANDLE
            .get()
            .unwrap()
            .with_current(|f| f.to_string())
            .unwrap();
        assert_eq!(current, "debug");
    }
}
