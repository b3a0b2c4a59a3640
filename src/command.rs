//! Commands carried by menu entries and the per-build table that resolves
//! host handles back to them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::query::Record;
use crate::source::AuthError;

/// Reference to a backend entity, e.g. `Shot:1234`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: i64,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Read `type` and `id` from a backend record.
    pub fn from_record(record: &Record) -> Option<Self> {
        let entity_type = record.get("type")?.as_str()?;
        let id = record.get("id")?.as_i64()?;
        Some(Self::new(entity_type, id))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    LinkEntity { entity: EntityRef },
    UnlinkEntity { entity: EntityRef },
    SignIn,
    SignOut,
    ToggleShowAll,
    ToggleShowAllForEntity { entity: EntityRef },
    PageForward { menu: String },
    PageBackward { menu: String },
    ToggleEntityInList { entity: EntityRef },
    LoadEntityIntoTarget { entity: EntityRef },
    PublishToTask { task: EntityRef },
    Rescan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    LinkEntity,
    UnlinkEntity,
    SignIn,
    SignOut,
    ToggleShowAll,
    ToggleShowAllForEntity,
    PageForward,
    PageBackward,
    ToggleEntityInList,
    LoadEntityIntoTarget,
    PublishToTask,
    Rescan,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::LinkEntity { .. } => CommandKind::LinkEntity,
            Command::UnlinkEntity { .. } => CommandKind::UnlinkEntity,
            Command::SignIn => CommandKind::SignIn,
            Command::SignOut => CommandKind::SignOut,
            Command::ToggleShowAll => CommandKind::ToggleShowAll,
            Command::ToggleShowAllForEntity { .. } => CommandKind::ToggleShowAllForEntity,
            Command::PageForward { .. } => CommandKind::PageForward,
            Command::PageBackward { .. } => CommandKind::PageBackward,
            Command::ToggleEntityInList { .. } => CommandKind::ToggleEntityInList,
            Command::LoadEntityIntoTarget { .. } => CommandKind::LoadEntityIntoTarget,
            Command::PublishToTask { .. } => CommandKind::PublishToTask,
            Command::Rescan => CommandKind::Rescan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no command bound to handle {0}")]
    UnknownHandle(String),
    #[error("handle {0} belongs to a menu that has since been rebuilt")]
    StaleHandle(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{kind:?} failed: {message}")]
    Action { kind: CommandKind, message: String },
}

/// Opaque key the host passes back when an entry is activated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandHandle {
    menu: String,
    generation: Uuid,
    key: u32,
}

impl CommandHandle {
    pub fn menu(&self) -> &str {
        &self.menu
    }
}

impl fmt::Display for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.menu, self.key)
    }
}

/// Handle -> command bindings for one menu build. Replaced wholesale on the
/// next build of the same menu, which makes older handles stale.
#[derive(Debug)]
pub struct DispatchTable {
    menu: String,
    generation: Uuid,
    next_key: u32,
    commands: HashMap<u32, Command>,
}

impl DispatchTable {
    pub fn new(menu: impl Into<String>) -> Self {
        Self {
            menu: menu.into(),
            generation: Uuid::new_v4(),
            next_key: 0,
            commands: HashMap::new(),
        }
    }

    pub fn bind(&mut self, command: Command) -> CommandHandle {
        let key = self.next_key;
        self.next_key += 1;
        self.commands.insert(key, command);
        CommandHandle {
            menu: self.menu.clone(),
            generation: self.generation,
            key,
        }
    }

    pub fn resolve(&self, handle: &CommandHandle) -> Result<&Command, DispatchError> {
        if handle.menu != self.menu || handle.generation != self.generation {
            return Err(DispatchError::StaleHandle(handle.to_string()));
        }
        self.commands
            .get(&handle.key)
            .ok_or_else(|| DispatchError::UnknownHandle(handle.to_string()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
