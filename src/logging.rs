//! Process-wide log subscriber.
//!
//! Library code only emits `tracing` events; the binary installs the
//! subscriber once at startup.

use tracing_subscriber::EnvFilter;

/// Default filter for a verbosity count: 0 → info, 1 → debug, 2+ → trace.
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info,sqlx=warn",
        1 => "debug,sqlx=warn",
        _ => "trace",
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over `verbosity` when set.
///
/// Logs go to stderr so command summaries on stdout stay clean.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
