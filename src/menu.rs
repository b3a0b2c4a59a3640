use serde::{Deserialize, Serialize};

use crate::cache::EntryId;
use crate::command::{Command, CommandHandle, DispatchTable, EntityRef};
use crate::paging::PageWindow;
use crate::query::Record;

/// What the host currently has selected (clip/track item ids).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection(pub Vec<String>);

impl Selection {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Closed set of visibility predicates the host evaluates per selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityRule {
    Always,
    HasSelection,
    SingleSelection,
}

impl VisibilityRule {
    pub fn is_visible(&self, selection: &Selection) -> bool {
        match self {
            VisibilityRule::Always => true,
            VisibilityRule::HasSelection => !selection.is_empty(),
            VisibilityRule::SingleSelection => selection.len() == 1,
        }
    }
}

/// An entry before it is bound into a dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: String,
    pub command: Command,
    pub visible: Option<VisibilityRule>,
    pub enabled: bool,
}

impl MenuEntry {
    pub fn new(label: impl Into<String>, command: Command) -> Self {
        Self {
            label: label.into(),
            command,
            visible: None,
            enabled: true,
        }
    }

    pub fn visible_when(mut self, rule: Option<VisibilityRule>) -> Self {
        self.visible = rule;
        self
    }
}

// ---------- host-facing output ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuAction {
    pub name: String,
    pub execute: CommandHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_visible: Option<VisibilityRule>,
    pub is_enabled: bool,
}

impl MenuAction {
    /// Host-side check; entries without a rule are always shown.
    pub fn visible_for(&self, selection: &Selection) -> bool {
        self.is_visible
            .map_or(true, |rule| rule.is_visible(selection))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MenuItem {
    Action(MenuAction),
    Submenu(Menu),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Menu {
    pub name: String,
    pub actions: Vec<MenuItem>,
}

impl Menu {
    /// Every action in this menu and its submenus, depth first.
    pub fn flatten(&self) -> Vec<&MenuAction> {
        let mut out = Vec::new();
        for item in &self.actions {
            match item {
                MenuItem::Action(a) => out.push(a),
                MenuItem::Submenu(m) => out.extend(m.flatten()),
            }
        }
        out
    }

    pub fn find(&self, name: &str) -> Option<&MenuAction> {
        self.flatten().into_iter().find(|a| a.name == name)
    }
}

/// A built menu plus what was dropped while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltMenu {
    pub menu: Menu,
    /// Records skipped for missing fields
    pub skipped: usize,
    pub current_page: usize,
    pub num_pages: usize,
}

// ---------- list menu definitions ----------

/// What activating a content item does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Link,
    Unlink,
    ToggleInList,
    LoadIntoTarget,
    PublishToTask,
}

impl ItemAction {
    pub fn command(&self, entity: EntityRef) -> Command {
        match self {
            ItemAction::Link => Command::LinkEntity { entity },
            ItemAction::Unlink => Command::UnlinkEntity { entity },
            ItemAction::ToggleInList => Command::ToggleEntityInList { entity },
            ItemAction::LoadIntoTarget => Command::LoadEntityIntoTarget { entity },
            ItemAction::PublishToTask => Command::PublishToTask { task: entity },
        }
    }
}

/// Which toggle switches a list between its filtered and its full entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowAllScope {
    Global,
    Entity(EntityRef),
}

/// A menu whose content comes from one cached query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMenu {
    /// Unique per menu; keys the dispatch table and page state
    pub name: String,
    pub title: String,
    pub entry: EntryId,
    /// Unfiltered variant, shown while the show-all toggle is on
    pub all_entry: Option<(EntryId, ShowAllScope)>,
    pub item_action: ItemAction,
    pub label_field: String,
    pub item_visibility: Option<VisibilityRule>,
}

impl ListMenu {
    pub fn new(name: impl Into<String>, title: impl Into<String>, entry: EntryId, item_action: ItemAction) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            entry,
            all_entry: None,
            item_action,
            label_field: "code".to_string(),
            item_visibility: None,
        }
    }

    pub fn with_show_all(mut self, all_entry: EntryId, scope: ShowAllScope) -> Self {
        self.all_entry = Some((all_entry, scope));
        self
    }

    pub fn label_field(mut self, field: impl Into<String>) -> Self {
        self.label_field = field.into();
        self
    }

    pub fn item_visibility(mut self, rule: VisibilityRule) -> Self {
        self.item_visibility = Some(rule);
        self
    }

    /// Turn records into content entries. Records without a `type`/`id` pair
    /// or a string label are skipped and counted.
    pub(crate) fn draft_items(&self, records: &[Record]) -> (Vec<MenuEntry>, usize) {
        let mut items = Vec::with_capacity(records.len());
        let mut skipped = 0;
        for (index, record) in records.iter().enumerate() {
            let entity = EntityRef::from_record(record);
            let label = record.get(&self.label_field).and_then(|v| v.as_str());
            match (entity, label) {
                (Some(entity), Some(label)) => items.push(
                    MenuEntry::new(label, self.item_action.command(entity))
                        .visible_when(self.item_visibility),
                ),
                _ => {
                    skipped += 1;
                    tracing::warn!(
                        menu = %self.name,
                        index,
                        label_field = %self.label_field,
                        "skipping malformed record"
                    );
                }
            }
        }
        (items, skipped)
    }

    /// Leading controls shown on every page.
    pub(crate) fn controls(&self, show_all: bool, user: &str) -> Vec<MenuEntry> {
        let mut controls = vec![MenuEntry::new("Refresh", Command::Rescan)];
        if let Some((_, scope)) = &self.all_entry {
            let label = if show_all { "Show Linked Only" } else { "Show All" };
            let command = match scope {
                ShowAllScope::Global => Command::ToggleShowAll,
                ShowAllScope::Entity(entity) => Command::ToggleShowAllForEntity {
                    entity: entity.clone(),
                },
            };
            controls.push(MenuEntry::new(label, command));
        }
        controls.push(MenuEntry::new(format!("Sign Out ({user})"), Command::SignOut));
        controls
    }
}

// ---------- assembly ----------

fn bind(table: &mut DispatchTable, entry: MenuEntry) -> MenuItem {
    MenuItem::Action(MenuAction {
        name: entry.label,
        execute: table.bind(entry.command),
        is_visible: entry.visible,
        is_enabled: entry.enabled,
    })
}

/// Bind a page window into host menu form: controls, previous, content, next.
pub(crate) fn assemble(
    menu_name: &str,
    title: &str,
    window: PageWindow<MenuEntry>,
    table: &mut DispatchTable,
) -> Menu {
    let mut actions = Vec::with_capacity(window.slot_count());
    for entry in window.controls {
        actions.push(bind(table, entry));
    }
    if window.show_previous {
        let label = format!("Previous Page ({}/{})", window.current_page, window.num_pages);
        actions.push(bind(
            table,
            MenuEntry::new(label, Command::PageBackward { menu: menu_name.to_string() }),
        ));
    }
    for entry in window.content {
        actions.push(bind(table, entry));
    }
    if window.show_next {
        let label = format!("Next Page ({}/{})", window.current_page + 2, window.num_pages);
        actions.push(bind(
            table,
            MenuEntry::new(label, Command::PageForward { menu: menu_name.to_string() }),
        ));
    }
    Menu {
        name: title.to_string(),
        actions,
    }
}

/// Single "Sign In" entry shown while no session exists.
pub(crate) fn signed_out(title: &str, table: &mut DispatchTable) -> Menu {
    Menu {
        name: title.to_string(),
        actions: vec![bind(table, MenuEntry::new("Sign In…", Command::SignIn))],
    }
}
