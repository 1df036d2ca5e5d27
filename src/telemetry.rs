//! Tracing setup for the overseer binary.

use tracing_subscriber::EnvFilter;

/// Guard returned by [`init`]; hold it for the lifetime of `main`.
pub struct Telemetry;

/// Initialize the global tracing subscriber.
///
/// Filtering follows `OVERSEER_LOG`, then `RUST_LOG`, then defaults to
/// warnings only so the operator-facing diagnostic lines stay readable.
/// Output goes to stderr, never to stdout where extracted answers land.
pub fn init() -> Telemetry {
    let filter = EnvFilter::try_from_env("OVERSEER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    Telemetry
}
