//! Development-time tracing.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Product output (unit
//! records, solver logs, batch summaries) is written to the batch tree regardless of
//! the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=engine=debug,fishsim=info fishsim run batch.toml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
