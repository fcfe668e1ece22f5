/*!
 * Tracing subscriber setup for the `pubmatch` binary
 *
 * Log lines go to stderr so stdout only carries the match result dump.
 */

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "nppes_pubmatch=info,pubmatch=info";

/// Initializes console logging with an `RUST_LOG`-driven filter.
///
/// `verbose` raises the crate's level to debug. Calling this twice is a
/// no-op, so tests and embedders that install their own subscriber are
/// left alone.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("nppes_pubmatch=debug,pubmatch=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}
