//! Structured logging setup built on `tracing` + `tracing-subscriber` with
//! an `EnvFilter`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops. `RUST_LOG` always wins; `verbose` only sets
/// the default level when `RUST_LOG` isn't set.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
