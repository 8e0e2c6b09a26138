//! Diagnostic tracing for buildfix.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The per-project
//! transcript, snapshots and summaries under the state directory are product
//! output and are written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or
/// `warn,buildfix=info` when `verbose` is true.
///
/// # Example
/// ```bash
/// RUST_LOG=buildfix=debug buildfix run https://github.com/owner/app
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,buildfix=info" } else { "warn" }
}
