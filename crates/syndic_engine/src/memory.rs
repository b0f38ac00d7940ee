//! In-memory entity host and reference-based dependency calculator.

use crate::context::ImportContext;
use crate::entity::{EntityKind, EntityRef, LocalEntity};
use crate::error::{SyncError, SyncResult};
use crate::host::{DependencyCalculator, DependencyWrapper, EntityHost, Resolution};
use crate::stack::DependencyStack;
use crate::stub::StubLedger;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use syndic_cdf::{attributes, CdfObject};
use tracing::debug;
use uuid::Uuid;

/// Entity type given to stubs until their object arrives.
pub const STUB_ENTITY_TYPE: &str = "stub";

const RESERVED_ATTRIBUTES: &[&str] = &[
    attributes::HASH,
    attributes::ENTITY_TYPE,
    attributes::BUNDLE,
    attributes::LABEL,
    attributes::LANGCODE,
];

/// An in-memory entity host.
///
/// Besides storage it records the order of syndicated saves and supports
/// declining entity types, matching objects to local entities under a
/// different UUID, and injected save failures.
#[derive(Debug, Default)]
pub struct MemoryEntityHost {
    entities: RwLock<BTreeMap<Uuid, LocalEntity>>,
    aliases: RwLock<HashMap<Uuid, Uuid>>,
    declined_types: RwLock<HashSet<String>>,
    failing_saves: RwLock<HashSet<Uuid>>,
    syndicated_saves: RwLock<Vec<Uuid>>,
    next_id: AtomicU64,
}

impl MemoryEntityHost {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an entity as a local edit and returns it with its id.
    pub fn insert(&self, mut entity: LocalEntity) -> LocalEntity {
        self.assign_id(&mut entity);
        self.entities.write().insert(entity.uuid, entity.clone());
        entity
    }

    /// Gets an entity by UUID regardless of type.
    pub fn get(&self, uuid: &Uuid) -> Option<LocalEntity> {
        self.entities.read().get(uuid).cloned()
    }

    /// Returns true if an entity with this UUID exists.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.entities.read().contains_key(uuid)
    }

    /// Number of stored entities, stubs included.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Resolves objects with `remote` to the local entity `local`.
    pub fn alias(&self, remote: Uuid, local: Uuid) {
        self.aliases.write().insert(remote, local);
    }

    /// Declines every object of this entity type.
    pub fn decline_type(&self, entity_type: impl Into<String>) {
        self.declined_types.write().insert(entity_type.into());
    }

    /// Makes saves of this UUID fail until cleared.
    pub fn fail_saves_of(&self, uuid: Uuid) {
        self.failing_saves.write().insert(uuid);
    }

    /// Clears injected save failures.
    pub fn clear_failures(&self) {
        self.failing_saves.write().clear();
    }

    /// UUIDs saved while syndicating, in save order.
    pub fn syndicated_saves(&self) -> Vec<Uuid> {
        self.syndicated_saves.read().clone()
    }

    /// All entities with local ids cleared, for comparing end states.
    pub fn snapshot(&self) -> BTreeMap<Uuid, LocalEntity> {
        self.entities
            .read()
            .iter()
            .map(|(uuid, entity)| {
                let mut entity = entity.clone();
                entity.id = None;
                (*uuid, entity)
            })
            .collect()
    }

    fn assign_id(&self, entity: &mut LocalEntity) {
        if entity.id.is_none() {
            entity.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        }
    }

    fn local_uuid(&self, uuid: &Uuid) -> Uuid {
        self.aliases.read().get(uuid).copied().unwrap_or(*uuid)
    }
}

impl EntityHost for MemoryEntityHost {
    fn load(&self, entity_type: &str, uuid: &Uuid) -> SyncResult<Option<LocalEntity>> {
        let local = self.local_uuid(uuid);
        Ok(self
            .entities
            .read()
            .get(&local)
            .filter(|e| e.entity_type == entity_type)
            .cloned())
    }

    fn resolve(&self, object: &CdfObject, _stack: &DependencyStack) -> SyncResult<Resolution> {
        let entity_type = object
            .entity_type()
            .ok_or_else(|| SyncError::host(format!("object {} has no entity type", object.uuid)))?;
        if self.declined_types.read().contains(entity_type) {
            return Ok(Resolution::Declined {
                reason: format!("entity type {} is not accepted", entity_type),
            });
        }
        let local = self.local_uuid(&object.uuid);
        if let Some(existing) = self.get(&local) {
            return Ok(Resolution::Existing(existing));
        }
        Ok(Resolution::Created(
            LocalEntity::new(entity_type, object.uuid)
                .with_kind(EntityKind::from_cdf_type(object.cdf_type)),
        ))
    }

    fn populate(
        &self,
        entity: &mut LocalEntity,
        object: &CdfObject,
        stack: &DependencyStack,
        stubs: &mut StubLedger,
    ) -> SyncResult<()> {
        if let Some(entity_type) = object.entity_type() {
            entity.entity_type = entity_type.to_string();
        }
        entity.kind = EntityKind::from_cdf_type(object.cdf_type);
        entity.bundle = object.text_attribute(attributes::BUNDLE).map(str::to_string);
        entity.label = object.label().map(str::to_string);
        if let Some(langcode) = object.text_attribute(attributes::LANGCODE) {
            entity.langcode = langcode.to_string();
        }
        entity.created = object.created.clone();
        entity.modified = object.modified.clone();
        entity.origin = Some(object.origin);

        entity.fields.clear();
        entity.references.clear();
        for (name, attribute) in &object.attributes {
            if RESERVED_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            if attribute.attr_type.is_reference() {
                entity.references.insert(name.clone(), attribute.uuid_values());
            } else if let Some(value) = attribute
                .get_value(&entity.langcode)
                .or_else(|| attribute.neutral_value())
            {
                entity.fields.insert(name.clone(), value.clone());
            }
        }

        for target in entity.referenced_uuids() {
            if stack.has_dependency(&target) || stubs.contains(&target) || self.contains(&target) {
                continue;
            }
            let mut stub = LocalEntity::stub(STUB_ENTITY_TYPE, target);
            self.assign_id(&mut stub);
            debug!(uuid = %target, referenced_by = %object.uuid, "Created stub");
            self.entities.write().insert(target, stub);
            stubs.record(STUB_ENTITY_TYPE, target);
        }
        Ok(())
    }

    fn save(&self, entity: &mut LocalEntity, context: &ImportContext) -> SyncResult<()> {
        if self.failing_saves.read().contains(&entity.uuid) {
            return Err(SyncError::host(format!("save of {} failed", entity.uuid)));
        }
        self.assign_id(entity);
        self.entities.write().insert(entity.uuid, entity.clone());
        if context.is_syndicating() {
            self.syndicated_saves.write().push(entity.uuid);
        }
        Ok(())
    }

    fn delete(&self, entity_type: &str, uuid: &Uuid, _context: &ImportContext) -> SyncResult<bool> {
        let local = self.local_uuid(uuid);
        let mut entities = self.entities.write();
        match entities.get(&local) {
            Some(entity) if entity.entity_type == entity_type => {
                entities.remove(&local);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Dependency calculator that follows entity reference fields.
#[derive(Debug, Clone)]
pub struct ReferenceCalculator {
    host: Arc<MemoryEntityHost>,
    modules: HashMap<String, String>,
}

impl ReferenceCalculator {
    /// Creates a calculator over a memory host.
    pub fn new(host: Arc<MemoryEntityHost>) -> Self {
        Self {
            host,
            modules: HashMap::new(),
        }
    }

    /// Declares the capability that provides an entity type.
    pub fn with_module(mut self, entity_type: impl Into<String>, module: impl Into<String>) -> Self {
        self.modules.insert(entity_type.into(), module.into());
        self
    }
}

impl DependencyCalculator for ReferenceCalculator {
    fn calculate(&self, entity: &LocalEntity) -> SyncResult<DependencyWrapper> {
        let mut seen: HashSet<Uuid> = HashSet::from([entity.uuid]);
        let mut queue: VecDeque<Uuid> = entity.referenced_uuids().into();
        let mut dependencies = Vec::new();

        while let Some(uuid) = queue.pop_front() {
            if !seen.insert(uuid) {
                continue;
            }
            let Some(found) = self.host.get(&uuid) else {
                debug!(uuid = %uuid, root = %entity.uuid, "Skipping dangling reference");
                continue;
            };
            // Stubs stand in for objects owned elsewhere.
            if found.is_stub() {
                debug!(uuid = %uuid, root = %entity.uuid, "Skipping stub reference");
                continue;
            }
            queue.extend(found.referenced_uuids());
            dependencies.push(EntityRef::new(found.entity_type, uuid));
        }

        let modules = self
            .modules
            .get(&entity.entity_type)
            .cloned()
            .into_iter()
            .collect();

        Ok(DependencyWrapper {
            entity: entity.entity_ref(),
            dependencies,
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syndic_cdf::{AttributeType, CdfAttribute, CdfType};

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn object(n: u128, entity_type: &str, references: &[u128]) -> CdfObject {
        let targets: Vec<String> = references.iter().map(|&r| uuid(r).to_string()).collect();
        CdfObject::new(uuid(n), CdfType::ContentEntity, uuid(1000))
            .with_attribute(
                attributes::ENTITY_TYPE,
                CdfAttribute::neutral(AttributeType::KEYWORD, entity_type),
            )
            .with_attribute("title", CdfAttribute::neutral(AttributeType::STRING, "Hello"))
            .with_attribute(
                "field_tags",
                CdfAttribute::neutral("array<reference>".parse().unwrap(), targets),
            )
    }

    #[test]
    fn populate_creates_stubs_for_unknown_references() {
        let host = MemoryEntityHost::new();
        host.insert(LocalEntity::new("user", uuid(3)));
        let mut stack = DependencyStack::new();
        stack.add_dependency(crate::stack::StackEntry::from_entity(
            uuid(4),
            &LocalEntity::new("taxonomy_term", uuid(4)),
        ));
        let mut stubs = StubLedger::new();

        let source = object(1, "node", &[2, 3, 4]);
        let mut entity = match host.resolve(&source, &stack).unwrap() {
            Resolution::Created(entity) => entity,
            other => panic!("unexpected {:?}", other),
        };
        host.populate(&mut entity, &source, &stack, &mut stubs).unwrap();

        assert_eq!(entity.fields["title"], serde_json::json!("Hello"));
        assert_eq!(entity.references["field_tags"], vec![uuid(2), uuid(3), uuid(4)]);
        assert_eq!(stubs.unfilled(), vec![uuid(2)]);
        assert!(host.get(&uuid(2)).unwrap().is_stub());
    }

    #[test]
    fn resolve_declines_and_aliases() {
        let host = MemoryEntityHost::new();
        host.decline_type("block");
        let stack = DependencyStack::new();
        assert!(matches!(
            host.resolve(&object(1, "block", &[]), &stack).unwrap(),
            Resolution::Declined { .. }
        ));

        host.insert(LocalEntity::new("node", uuid(50)));
        host.alias(uuid(2), uuid(50));
        match host.resolve(&object(2, "node", &[]), &stack).unwrap() {
            Resolution::Existing(entity) => assert_eq!(entity.uuid, uuid(50)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn save_failure_and_log() {
        let host = MemoryEntityHost::new();
        host.fail_saves_of(uuid(1));
        let mut entity = LocalEntity::new("node", uuid(1));
        let context = ImportContext::syndication(uuid(1000));
        assert!(host.save(&mut entity, &context).is_err());

        host.clear_failures();
        host.save(&mut entity, &context).unwrap();
        host.save(&mut LocalEntity::new("node", uuid(2)), &ImportContext::local_edit())
            .unwrap();
        assert!(entity.id.is_some());
        assert_eq!(host.syndicated_saves(), vec![uuid(1)]);
    }

    #[test]
    fn calculator_follows_references_transitively() {
        let host = Arc::new(MemoryEntityHost::new());
        host.insert(LocalEntity::new("file", uuid(3)));
        host.insert(LocalEntity::new("media", uuid(2)).with_reference("field_file", vec![uuid(3)]));
        let root = host.insert(
            LocalEntity::new("node", uuid(1))
                .with_reference("field_media", vec![uuid(2), uuid(9)])
                .with_reference("field_self", vec![uuid(1)]),
        );

        let calculator = ReferenceCalculator::new(host).with_module("node", "node");
        let wrapper = calculator.calculate(&root).unwrap();
        assert_eq!(wrapper.dependency_uuids(), vec![uuid(2), uuid(3)]);
        assert_eq!(wrapper.modules, vec!["node".to_string()]);
    }

    #[test]
    fn calculator_ignores_stubs() {
        let host = Arc::new(MemoryEntityHost::new());
        let stack = DependencyStack::new();
        let mut stubs = StubLedger::new();
        let source = object(1, "node", &[9]);
        let mut entity = match host.resolve(&source, &stack).unwrap() {
            Resolution::Created(entity) => entity,
            other => panic!("unexpected {:?}", other),
        };
        host.populate(&mut entity, &source, &stack, &mut stubs).unwrap();
        host.save(&mut entity, &ImportContext::syndication(uuid(1000)))
            .unwrap();
        assert!(host.get(&uuid(9)).unwrap().is_stub());

        let wrapper = ReferenceCalculator::new(host).calculate(&entity).unwrap();
        assert!(wrapper.dependencies.is_empty());
    }
}
