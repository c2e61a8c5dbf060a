//! Development-time tracing for debugging the agent.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the agent's product output.
//! - **Trace events (`io/trace`)**: per-session telemetry pushed to the sink.
//!   Always sent, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter` when unset or invalid.
/// Output: stderr, compact format. Safe to call more than once.
///
/// ```bash
/// RUST_LOG=agent=debug agent run "add a hello page"
/// ```
pub fn init_with_default(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

/// Initialize with the `warn` default used by the CLI.
pub fn init() {
    init_with_default("warn");
}
