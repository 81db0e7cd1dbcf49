//! Tracing subscriber setup.
//!
//! The filter comes from `RUST_LOG` when set, then `TETHER_LOG_LEVEL`, then
//! defaults to `info`.
//!
//! ```no_run
//! tracing::subscriber::set_global_default(tether::logging::subscriber())
//!     .expect("no other subscriber installed");
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LEVEL: &str = "info";

/// The filter directive used when `RUST_LOG` is absent or invalid.
pub fn default_directive() -> String {
    std::env::var("TETHER_LOG_LEVEL")
        .ok()
        .map(|level| level.trim().to_lowercase())
        .filter(|level| !level.is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

/// Build the filter for [`subscriber`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive()))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Create a tracing subscriber for Tether logs.
pub fn subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
}

/// Install [`subscriber`] as the global default. Returns `false` if one was
/// already installed.
pub fn init() -> bool {
    tracing::subscriber::set_global_default(subscriber()).is_ok()
}
