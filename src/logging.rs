//! Subscriber setup for hosts that do not install their own.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a fmt subscriber. `RUST_LOG` overrides `default_filter`.
/// Later calls are no-ops, and a subscriber the host already installed is
/// left in place.
pub fn init_logging(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("trackmenu=info"));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok();
        if installed {
            tracing::debug!(default_filter, "logging initialised");
        }
    });
}
