//! Host-side consumer of the [`ChangeSignal`].
//!
//! The host calls [`RefreshDriver::tick`] from its own timer or idle hook.
//! When the cache has raised a change, the driver asks the host to rebuild its
//! menus and only then acknowledges the change it saw.

use std::sync::Arc;

use crate::change_signal::ChangeSignal;

/// Host hook that re-invokes the menu-building entry point.
pub trait RescanHook: Send + Sync {
    fn rescan(&self);
}

pub struct RefreshDriver {
    signal: Arc<ChangeSignal>,
    hook: Arc<dyn RescanHook>,
}

impl RefreshDriver {
    pub fn new(signal: Arc<ChangeSignal>, hook: Arc<dyn RescanHook>) -> Self {
        Self { signal, hook }
    }

    /// Returns true if a rebuild was requested.
    pub fn tick(&self) -> bool {
        let Some(change) = self.signal.pending() else {
            return false;
        };
        tracing::debug!("cache changed, requesting menu rescan");
        self.hook.rescan();
        self.signal.acknowledge(change);
        true
    }
}
