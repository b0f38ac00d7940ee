//! Dependency stack: what has been materialized during one ingestion run.

use crate::entity::LocalEntity;
use std::collections::HashMap;
use uuid::Uuid;

/// A materialized entity as recorded on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    /// UUID of the CDF object that produced the entity.
    pub uuid: Uuid,
    /// Local entity type.
    pub entity_type: String,
    /// Local id.
    pub id: Option<u64>,
    /// Local UUID; differs from `uuid` when the host matched an existing
    /// entity under another identity.
    pub local_uuid: Uuid,
}

impl StackEntry {
    /// Creates an entry for an entity materialized from `uuid`.
    pub fn from_entity(uuid: Uuid, entity: &LocalEntity) -> Self {
        Self {
            uuid,
            entity_type: entity.entity_type.clone(),
            id: entity.id,
            local_uuid: entity.uuid,
        }
    }

    /// Returns true if the entity was matched under another identity.
    pub fn has_alternate_identity(&self) -> bool {
        self.uuid != self.local_uuid
    }
}

/// Append-only map of materialized entities for one ingestion run.
///
/// An entry is reachable under the object UUID and, when different, under
/// the local UUID too.
#[derive(Debug, Clone, Default)]
pub struct DependencyStack {
    entries: HashMap<Uuid, StackEntry>,
    order: Vec<Uuid>,
}

impl DependencyStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. Entries are never removed or replaced.
    ///
    /// Returns false if the UUID was already present.
    pub fn add_dependency(&mut self, entry: StackEntry) -> bool {
        if self.entries.contains_key(&entry.uuid) {
            return false;
        }
        self.order.push(entry.uuid);
        if entry.has_alternate_identity() {
            self.entries.entry(entry.local_uuid).or_insert_with(|| entry.clone());
        }
        self.entries.insert(entry.uuid, entry);
        true
    }

    /// Returns true if the UUID is on the stack.
    pub fn has_dependency(&self, uuid: &Uuid) -> bool {
        self.entries.contains_key(uuid)
    }

    /// Returns true if every UUID is on the stack.
    pub fn has_dependencies<'a>(&self, uuids: impl IntoIterator<Item = &'a Uuid>) -> bool {
        uuids.into_iter().all(|uuid| self.has_dependency(uuid))
    }

    /// Gets an entry by object or local UUID.
    pub fn get_dependency(&self, uuid: &Uuid) -> Option<&StackEntry> {
        self.entries.get(uuid)
    }

    /// Object UUIDs in the order they were added.
    pub fn materialized_order(&self) -> &[Uuid] {
        &self.order
    }

    /// Number of reachable keys, including alternate identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
