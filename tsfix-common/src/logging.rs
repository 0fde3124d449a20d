//! Tracing subscriber setup shared by both binaries

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects `debug`, and the
/// configured level (from `[logging] level`) is used.
pub fn init_tracing(config_level: &str, verbose: bool) {
    let default_level = if verbose { "debug" } else { config_level };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // A subscriber may already be installed (tests, embedding); keep it
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
