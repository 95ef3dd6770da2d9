//! Development-time tracing.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. It is not persisted;
//! the per-iteration audit trail lives in `io::iteration_log`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG` and defaults to `warn`. Output is compact, on stderr.
///
/// ```bash
/// RUST_LOG=arbor=debug arbor loop --session demo
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
