//! Tracing setup for the `strand` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the host. Hazard and stop-timeout reports additionally go through the
//! event bus, so they are visible even when no subscriber is installed.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber. Reads `RUST_LOG`, defaults to `warn`.
///
/// ```bash
/// RUST_LOG=strand_core=debug strand demo hazard
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second call (tests, embedding hosts) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
