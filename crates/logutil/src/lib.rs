//! Utilities for logging.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Maps a `-v` count to a default level. `RUST_LOG` overrides this.
pub fn verbosity_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Initialize a global subscriber writing to stderr.
///
/// Subsequent calls are no-ops.
pub fn init(verbosity: u8, mode: LoggingMode) {
    let filter = env_filter(verbosity_level(verbosity));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match mode {
        LoggingMode::Pretty => builder.pretty().try_init(),
        LoggingMode::Compact => builder.compact().try_init(),
        LoggingMode::Json => builder.json().try_init(),
    };
}

/// Initialize a subscriber for tests, capturing output per test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}
