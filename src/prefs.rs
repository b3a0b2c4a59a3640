//! Menu preferences that survive rebuilds and sessions: page positions and
//! show-all toggles. Persistence itself belongs to the host; this module only
//! maps the state to and from an opaque JSON value.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::command::EntityRef;
use crate::paging::PageState;

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference store unavailable: {0}")]
    Store(String),
    #[error("malformed preferences: {0}")]
    Format(#[from] serde_json::Error),
}

/// Host-owned key/value persistence.
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<Value, PreferenceError>;
    fn save(&self, prefs: &Value) -> Result<(), PreferenceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Page position per menu name
    #[serde(default)]
    pub pages: BTreeMap<String, PageState>,
    #[serde(default)]
    pub show_all: bool,
    /// Entities (as `Type:id`) whose lists show everything
    #[serde(default)]
    pub show_all_for_entity: BTreeSet<String>,
}

impl Preferences {
    /// Load through `store`, falling back to defaults when the store is empty,
    /// unavailable or holds something unreadable.
    pub fn load_from(store: &dyn PreferenceStore) -> Self {
        match store.load() {
            Ok(Value::Null) => Self::default(),
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::error!(error = %e, "malformed menu preferences, using defaults");
                Self::default()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "could not load menu preferences");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, store: &dyn PreferenceStore) -> Result<(), PreferenceError> {
        store.save(&serde_json::to_value(self)?)
    }

    /// Page state for `menu`, created at page 0 if missing. The host cap is
    /// authoritative, so a stored capacity is overwritten.
    pub fn page_state(&mut self, menu: &str, page_capacity: usize) -> &mut PageState {
        let state = self
            .pages
            .entry(menu.to_string())
            .or_insert_with(|| PageState::new(page_capacity));
        state.page_capacity = page_capacity;
        state
    }

    /// Returns the new value.
    pub fn toggle_show_all(&mut self) -> bool {
        self.show_all = !self.show_all;
        self.show_all
    }

    pub fn shows_all_for(&self, entity: &EntityRef) -> bool {
        self.show_all_for_entity.contains(&entity.to_string())
    }

    /// Returns the new value.
    pub fn toggle_show_all_for(&mut self, entity: &EntityRef) -> bool {
        let key = entity.to_string();
        if self.show_all_for_entity.remove(&key) {
            false
        } else {
            self.show_all_for_entity.insert(key);
            true
        }
    }
}

/// In-process store. Useful for hosts without persistence and for tests.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    value: Mutex<Value>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn snapshot(&self) -> Value {
        self.value.lock().clone()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Value, PreferenceError> {
        Ok(self.value.lock().clone())
    }

    fn save(&self, prefs: &Value) -> Result<(), PreferenceError> {
        *self.value.lock() = prefs.clone();
        Ok(())
    }
}
