//! Log output for applications built on sigwire.
//!
//! The library crates only emit `tracing` events. Binaries call one of
//! these once at startup to print them.

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back
/// to [`DEFAULT_FILTER`].
///
/// Returns `false` if a global subscriber was already installed; the
/// existing one is kept.
pub fn init() -> bool {
    init_with_filter(DEFAULT_FILTER)
}

/// Like [`init`], with `directives` (e.g. `"sigwire_engine=debug,info"`)
/// as the fallback when `RUST_LOG` is unset or invalid.
pub fn init_with_filter(directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
    let installed = tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok();
    if installed {
        tracing::debug!(fallback = directives, "log output installed");
    }
    installed
}
