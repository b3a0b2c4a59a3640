//! The explicit context object a host plugin constructs once and keeps for
//! its lifetime. It owns the query cache, the persisted menu preferences and
//! the dispatch table of every menu it has built, and it routes activated
//! entries to the host.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::cache::{EntryId, QueryCache};
use crate::change_signal::ChangeSignal;
use crate::command::{Command, CommandHandle, CommandKind, DispatchError, DispatchTable, EntityRef};
use crate::config::EngineConfig;
use crate::menu::{self, BuiltMenu, ListMenu, Selection, ShowAllScope};
use crate::paging::paginate;
use crate::prefs::{PreferenceStore, Preferences};
use crate::query::Query;
use crate::refresh::{RefreshDriver, RescanHook};
use crate::source::CredentialProvider;

/// Actions the host application performs on behalf of menu entries.
///
/// Each action receives the host's current selection. Errors are plain
/// messages; they are logged and returned to the caller of
/// [`Connector::execute`].
pub trait Host: Send + Sync {
    /// Ask the host to re-invoke the menu-building entry point.
    fn rescan(&self);

    fn link_entity(&self, entity: &EntityRef, selection: &Selection) -> Result<(), String>;

    fn unlink_entity(&self, entity: &EntityRef, selection: &Selection) -> Result<(), String>;

    fn toggle_entity_in_list(&self, entity: &EntityRef, selection: &Selection) -> Result<(), String>;

    fn load_entity_into_target(&self, entity: &EntityRef, selection: &Selection) -> Result<(), String>;

    fn publish_to_task(&self, task: &EntityRef, selection: &Selection) -> Result<(), String>;
}

/// Lets the refresh driver call back into the host.
struct HostRescan(Arc<dyn Host>);

impl RescanHook for HostRescan {
    fn rescan(&self) {
        self.0.rescan();
    }
}

pub struct Connector {
    config: EngineConfig,
    provider: Arc<dyn CredentialProvider>,
    cache: QueryCache,
    store: Arc<dyn PreferenceStore>,
    prefs: Mutex<Preferences>,
    /// Dispatch table of the latest build, per menu name
    tables: DashMap<String, DispatchTable>,
    host: Arc<dyn Host>,
    refresh: RefreshDriver,
}

impl Connector {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn CredentialProvider>,
        store: Arc<dyn PreferenceStore>,
        host: Arc<dyn Host>,
    ) -> Self {
        let signal = Arc::new(ChangeSignal::new());
        let cache = QueryCache::new(provider.clone(), signal.clone(), config.cache_config());
        let prefs = Preferences::load_from(store.as_ref());
        let refresh = RefreshDriver::new(signal, Arc::new(HostRescan(host.clone())));
        Self {
            config,
            provider,
            cache,
            store,
            prefs: Mutex::new(prefs),
            tables: DashMap::new(),
            host,
            refresh,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn preferences(&self) -> Preferences {
        self.prefs.lock().clone()
    }

    /// Register a query using the configured eager-fetch policy.
    pub fn register(&self, query: Query) -> EntryId {
        self.cache.register(query, self.config.eager_fetch)
    }

    /// Install logging and start the background poll thread.
    pub fn start(&self) -> bool {
        crate::logging::init_logging(&self.config.log_filter);
        let started = self.cache.start();
        if started {
            tracing::info!(
                poll_interval_secs = self.config.poll_interval_secs,
                page_capacity = self.config.page_capacity,
                "connector started"
            );
        }
        started
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
        self.tables.clear();
        tracing::info!("connector stopped");
    }

    /// Host idle/timer hook. Requests a rescan if the cache changed since
    /// the last call.
    pub fn on_idle(&self) -> bool {
        self.refresh.tick()
    }

    /// Build one list menu from cached data. Never touches the network.
    /// Replaces the dispatch table of any previous build of the same menu.
    pub fn build_menu(&self, list: &ListMenu) -> BuiltMenu {
        let mut table = DispatchTable::new(&list.name);

        let Some(session) = self.provider.current_session() else {
            let built = BuiltMenu {
                menu: menu::signed_out(&list.title, &mut table),
                skipped: 0,
                current_page: 0,
                num_pages: 1,
            };
            self.tables.insert(list.name.clone(), table);
            return built;
        };

        let mut prefs = self.prefs.lock();
        let show_all = match &list.all_entry {
            Some((_, ShowAllScope::Global)) => prefs.show_all,
            Some((_, ShowAllScope::Entity(entity))) => prefs.shows_all_for(entity),
            None => false,
        };
        let entry = match (&list.all_entry, show_all) {
            (Some((all, _)), true) => *all,
            _ => list.entry,
        };

        let records = self.cache.get(entry, false).unwrap_or_else(|e| {
            tracing::warn!(menu = %list.name, error = %e, "menu source not registered");
            Default::default()
        });
        let (content, skipped) = list.draft_items(&records);
        let controls = list.controls(show_all, &session.user());

        let state = prefs.page_state(&list.name, self.config.page_capacity);
        let before = *state;
        let window = paginate(controls, content, state);
        let page_moved = *state != before;
        let (current_page, num_pages) = (window.current_page, window.num_pages);
        if page_moved {
            self.persist(&prefs);
        }
        drop(prefs);

        let built = BuiltMenu {
            menu: menu::assemble(&list.name, &list.title, window, &mut table),
            skipped,
            current_page,
            num_pages,
        };
        tracing::debug!(
            menu = %list.name,
            %entry,
            records = records.len(),
            skipped,
            current_page,
            num_pages,
            "built menu"
        );
        self.tables.insert(list.name.clone(), table);
        built
    }

    /// Host "execute" callback for an activated entry.
    pub fn execute(&self, handle: &CommandHandle, selection: &Selection) -> Result<(), DispatchError> {
        // Resolve and release the table before dispatching; a command may
        // trigger a rescan that rebuilds this very menu.
        let command = {
            let table = self
                .tables
                .get(handle.menu())
                .ok_or_else(|| DispatchError::UnknownHandle(handle.to_string()))?;
            table.resolve(handle)?.clone()
        };
        let result = self.dispatch(command, selection);
        if let Err(e) = &result {
            tracing::warn!(%handle, error = %e, "menu command failed");
        }
        result
    }

    fn dispatch(&self, command: Command, selection: &Selection) -> Result<(), DispatchError> {
        let kind = command.kind();
        tracing::debug!(?kind, "dispatching menu command");
        match command {
            Command::LinkEntity { entity } => {
                self.host_action(kind, self.host.link_entity(&entity, selection))
            }
            Command::UnlinkEntity { entity } => {
                self.host_action(kind, self.host.unlink_entity(&entity, selection))
            }
            Command::ToggleEntityInList { entity } => {
                self.host_action(kind, self.host.toggle_entity_in_list(&entity, selection))
            }
            Command::LoadEntityIntoTarget { entity } => {
                self.host_action(kind, self.host.load_entity_into_target(&entity, selection))
            }
            Command::PublishToTask { task } => {
                self.host_action(kind, self.host.publish_to_task(&task, selection))
            }
            Command::SignIn => {
                let session = self.provider.sign_in()?;
                tracing::info!(user = %session.user(), "signed in");
                self.auth_changed();
                Ok(())
            }
            Command::SignOut => {
                self.provider.clear_session();
                tracing::info!("signed out");
                self.auth_changed();
                Ok(())
            }
            Command::ToggleShowAll => {
                self.update_prefs(|prefs| {
                    prefs.toggle_show_all();
                });
                Ok(())
            }
            Command::ToggleShowAllForEntity { entity } => {
                self.update_prefs(|prefs| {
                    prefs.toggle_show_all_for(&entity);
                });
                Ok(())
            }
            Command::PageForward { menu } => {
                let capacity = self.config.page_capacity;
                self.update_prefs(|prefs| prefs.page_state(&menu, capacity).page_forward());
                Ok(())
            }
            Command::PageBackward { menu } => {
                let capacity = self.config.page_capacity;
                self.update_prefs(|prefs| prefs.page_state(&menu, capacity).page_backward());
                Ok(())
            }
            Command::Rescan => {
                self.host.rescan();
                Ok(())
            }
        }
    }

    fn host_action(
        &self,
        kind: CommandKind,
        result: Result<(), String>,
    ) -> Result<(), DispatchError> {
        result.map_err(|message| DispatchError::Action { kind, message })?;
        self.host.rescan();
        Ok(())
    }

    fn auth_changed(&self) {
        self.cache.signal().raise();
        self.host.rescan();
    }

    /// Mutate, persist and request a rebuild.
    fn update_prefs(&self, f: impl FnOnce(&mut Preferences)) {
        {
            let mut prefs = self.prefs.lock();
            f(&mut prefs);
            self.persist(&prefs);
        }
        self.host.rescan();
    }

    fn persist(&self, prefs: &Preferences) {
        if let Err(e) = prefs.save_to(self.store.as_ref()) {
            tracing::warn!(error = %e, "failed to save menu preferences");
        }
    }
}
