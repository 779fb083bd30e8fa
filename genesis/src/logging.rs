//! Development-time tracing for debugging the engine.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the workflow output.
//!
//! - **Iteration logging (`io/iteration_log`)**: Product artifacts in
//!   `.genesis/runs/<run-id>/iterations/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format so stdout stays reserved for command output.
///
/// # Example
/// ```bash
/// RUST_LOG=genesis=debug genesis run --project demo "create a hello world file"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
