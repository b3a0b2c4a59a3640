//! Menu engine for production-tracking plugins.
//!
//! A [`Connector`] keeps backend query results warm in a polling
//! [`QueryCache`], turns them into paged host menus, and routes activated
//! entries back to the [`Host`] through per-build dispatch tables.

pub mod cache;
pub mod change_signal;
pub mod command;
pub mod config;
pub mod connector;
pub mod logging;
pub mod menu;
pub mod paging;
pub mod prefs;
pub mod query;
pub mod refresh;
pub mod source;

pub use cache::{CacheError, CacheMetricsSnapshot, CycleReport, EntryId, QueryCache};
pub use change_signal::ChangeSignal;
pub use command::{Command, CommandHandle, CommandKind, DispatchError, DispatchTable, EntityRef};
pub use config::{CacheConfig, ConfigError, EngineConfig};
pub use connector::{Connector, Host};
pub use menu::{
    BuiltMenu, ItemAction, ListMenu, Menu, MenuAction, MenuEntry, MenuItem, Selection, ShowAllScope,
    VisibilityRule,
};
pub use paging::{PageState, PageWindow, paginate};
pub use prefs::{MemoryPreferenceStore, PreferenceError, PreferenceStore, Preferences};
pub use query::{Filter, Fingerprint, Query, Record};
pub use refresh::{RefreshDriver, RescanHook};
pub use source::{AuthError, CredentialProvider, DataSourceError, RemoteDataSource, Session};
