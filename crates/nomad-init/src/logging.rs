//! Diagnostic logging
//!
//! Logs go to stderr so they never mix with rendered scripts on stdout.
//! The filter comes from `NOMAD_INIT_LOG`, then `RUST_LOG`, then the
//! `-v` count.

use std::io;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LEVEL_ENV: &str = "NOMAD_INIT_LOG";
const ALT_LEVEL_ENV: &str = "RUST_LOG";

/// Default filter for a number of `-v` flags
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber
pub fn init(verbosity: u8) -> io::Result<()> {
    let env_filter = EnvFilter::try_from_env(LEVEL_ENV)
        .or_else(|_| EnvFilter::try_from_env(ALT_LEVEL_ENV))
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(verbosity > 1)
        .without_time();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .map_err(io::Error::other)
}
