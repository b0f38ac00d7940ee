//! Local entity representation shared between the engine and entity hosts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use syndic_cdf::{CdfType, LANGUAGE_NONE};
use uuid::Uuid;

/// Whether an entity holds content or configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Content entity.
    Content,
    /// Configuration entity.
    Config,
}

impl EntityKind {
    /// Maps the kind to the CDF object type.
    pub fn cdf_type(&self) -> CdfType {
        match self {
            EntityKind::Content => CdfType::ContentEntity,
            EntityKind::Config => CdfType::ConfigEntity,
        }
    }

    /// Maps a CDF object type to a kind, defaulting to content.
    pub fn from_cdf_type(cdf_type: CdfType) -> Self {
        match cdf_type {
            CdfType::ConfigEntity => EntityKind::Config,
            _ => EntityKind::Content,
        }
    }
}

/// Lifecycle of a local entity created during ingestion.
///
/// A stub is a placeholder created to satisfy a reference before the
/// referenced object is ingested. Filling it is a state transition that
/// keeps the local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Placeholder awaiting its CDF object.
    Stub,
    /// Fully populated entity.
    Materialized,
}

/// Lightweight identity of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type.
    pub entity_type: String,
    /// Entity UUID.
    pub uuid: Uuid,
}

impl EntityRef {
    /// Creates an entity reference.
    pub fn new(entity_type: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            uuid,
        }
    }
}

/// An entity as stored by the host repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    /// Entity type (for example `node`).
    pub entity_type: String,
    /// Stable UUID.
    pub uuid: Uuid,
    /// Host-assigned local id, set on first save.
    pub id: Option<u64>,
    /// Content or configuration.
    pub kind: EntityKind,
    /// Bundle (sub-type), if any.
    pub bundle: Option<String>,
    /// Human-readable label.
    pub label: Option<String>,
    /// Language of the field values.
    pub langcode: String,
    /// Plain field values.
    pub fields: BTreeMap<String, Value>,
    /// Entity reference fields.
    pub references: BTreeMap<String, Vec<Uuid>>,
    /// Creation timestamp.
    pub created: String,
    /// Last modification timestamp.
    pub modified: String,
    /// Repository the entity was syndicated from, if imported.
    pub origin: Option<Uuid>,
    /// Stub or materialized.
    pub state: EntityState,
}

impl LocalEntity {
    /// Creates an empty materialized content entity.
    pub fn new(entity_type: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            uuid,
            id: None,
            kind: EntityKind::Content,
            bundle: None,
            label: None,
            langcode: LANGUAGE_NONE.to_string(),
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
            created: String::new(),
            modified: String::new(),
            origin: None,
            state: EntityState::Materialized,
        }
    }

    /// Creates a stub placeholder.
    pub fn stub(entity_type: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            state: EntityState::Stub,
            ..Self::new(entity_type, uuid)
        }
    }

    /// Sets the kind.
    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the bundle.
    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the language.
    pub fn with_langcode(mut self, langcode: impl Into<String>) -> Self {
        self.langcode = langcode.into();
        self
    }

    /// Sets a plain field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a reference field.
    pub fn with_reference(mut self, name: impl Into<String>, targets: Vec<Uuid>) -> Self {
        self.references.insert(name.into(), targets);
        self
    }

    /// Sets the timestamps.
    pub fn with_timestamps(mut self, created: impl Into<String>, modified: impl Into<String>) -> Self {
        self.created = created.into();
        self.modified = modified.into();
        self
    }

    /// Returns true while the entity is a placeholder.
    pub fn is_stub(&self) -> bool {
        self.state == EntityState::Stub
    }

    /// Marks a stub as filled.
    pub fn fill(&mut self) {
        self.state = EntityState::Materialized;
    }

    /// Returns the entity reference.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.uuid)
    }

    /// Returns every UUID referenced by reference fields, sorted and unique.
    pub fn referenced_uuids(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self.references.values().flatten().copied().collect();
        uuids.sort();
        uuids.dedup();
        uuids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_fill_keeps_identity() {
        let mut entity = LocalEntity::stub("taxonomy_term", Uuid::from_u128(4));
        entity.id = Some(12);
        assert!(entity.is_stub());

        entity.fill();
        assert!(!entity.is_stub());
        assert_eq!(entity.id, Some(12));
        assert_eq!(entity.uuid, Uuid::from_u128(4));
    }

    #[test]
    fn referenced_uuids_are_unique() {
        let entity = LocalEntity::new("node", Uuid::from_u128(1))
            .with_reference("field_tags", vec![Uuid::from_u128(3), Uuid::from_u128(2)])
            .with_reference("uid", vec![Uuid::from_u128(2)]);
        assert_eq!(
            entity.referenced_uuids(),
            vec![Uuid::from_u128(2), Uuid::from_u128(3)]
        );
    }

    #[test]
    fn kind_maps_to_cdf_type() {
        assert_eq!(EntityKind::Config.cdf_type(), CdfType::ConfigEntity);
        assert_eq!(EntityKind::from_cdf_type(CdfType::Client), EntityKind::Content);
    }
}
