//! CDF objects: one syndicated unit.

use crate::attribute::{AttributeType, CdfAttribute};
use crate::error::CdfResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Names of attributes with a well-known meaning.
pub mod attributes {
    /// Digest of the attribute payload.
    pub const HASH: &str = "hash";
    /// Local entity type (e.g. `node`, `taxonomy_term`).
    pub const ENTITY_TYPE: &str = "entity_type";
    /// Entity bundle or subtype.
    pub const BUNDLE: &str = "bundle";
    /// Human readable label.
    pub const LABEL: &str = "label";
    /// Default language of the entity.
    pub const LANGCODE: &str = "langcode";
}

/// Classification of a CDF object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdfType {
    /// Editorial content (articles, media, terms).
    ContentEntity,
    /// Configuration (content types, vocabularies, field definitions).
    ConfigEntity,
    /// A registered repository.
    Client,
    /// Any type this version does not understand.
    #[serde(other)]
    Unknown,
}

impl CdfType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CdfType::ContentEntity => "content_entity",
            CdfType::ConfigEntity => "config_entity",
            CdfType::Client => "client",
            CdfType::Unknown => "unknown",
        }
    }
}

/// One syndicated unit.
///
/// # Invariants
///
/// - `dependencies` is flat: transitive dependencies are listed directly and
///   carried as sibling objects in the same document.
/// - The `hash` attribute is the digest of every other attribute, so it changes
///   exactly when attribute content changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdfObject {
    /// Stable identity across repositories.
    pub uuid: Uuid,
    /// Object classification.
    #[serde(rename = "type")]
    pub cdf_type: CdfType,
    /// UUID of the repository that owns the object.
    pub origin: Uuid,
    /// Creation timestamp (RFC 3339).
    #[serde(default)]
    pub created: String,
    /// Last modification timestamp (RFC 3339).
    #[serde(default)]
    pub modified: String,
    /// Typed, language-keyed attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, CdfAttribute>,
    /// Dependency UUID to the dependency's hash when this object was built.
    #[serde(default)]
    pub dependencies: BTreeMap<Uuid, String>,
    /// Capabilities the receiving host needs to interpret this object.
    #[serde(default, rename = "modules")]
    pub module_dependencies: Vec<String>,
}

impl CdfObject {
    /// Creates an object with no attributes or dependencies.
    pub fn new(uuid: Uuid, cdf_type: CdfType, origin: Uuid) -> Self {
        Self {
            uuid,
            cdf_type,
            origin,
            created: String::new(),
            modified: String::new(),
            attributes: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            module_dependencies: Vec::new(),
        }
    }

    /// Sets the created/modified timestamps.
    pub fn with_timestamps(mut self, created: impl Into<String>, modified: impl Into<String>) -> Self {
        self.created = created.into();
        self.modified = modified.into();
        self
    }

    /// Adds an attribute, returning self.
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: CdfAttribute) -> Self {
        self.set_attribute(name, attribute);
        self
    }

    /// Adds a dependency, returning self.
    pub fn with_dependency(mut self, uuid: Uuid, hash: impl Into<String>) -> Self {
        self.add_dependency(uuid, hash);
        self
    }

    /// Adds a required capability, returning self.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.add_module(module);
        self
    }

    /// Gets an attribute.
    pub fn attribute(&self, name: &str) -> Option<&CdfAttribute> {
        self.attributes.get(name)
    }

    /// Gets an attribute mutably.
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut CdfAttribute> {
        self.attributes.get_mut(name)
    }

    /// Inserts or replaces an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, attribute: CdfAttribute) {
        self.attributes.insert(name.into(), attribute);
    }

    /// Removes an attribute.
    pub fn remove_attribute(&mut self, name: &str) -> Option<CdfAttribute> {
        self.attributes.remove(name)
    }

    /// Returns the language-neutral text value of an attribute.
    pub fn text_attribute(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .and_then(CdfAttribute::neutral_value)
            .and_then(Value::as_str)
    }

    /// Returns the recorded content hash.
    pub fn hash(&self) -> Option<&str> {
        self.text_attribute(attributes::HASH)
    }

    /// Returns the local entity type carried in the attributes.
    pub fn entity_type(&self) -> Option<&str> {
        self.text_attribute(attributes::ENTITY_TYPE)
    }

    /// Returns the human readable label carried in the attributes.
    pub fn label(&self) -> Option<&str> {
        self.text_attribute(attributes::LABEL)
    }

    /// Computes the digest of the attribute payload, excluding the hash itself.
    pub fn computed_hash(&self) -> CdfResult<String> {
        let payload: BTreeMap<&str, &CdfAttribute> = self
            .attributes
            .iter()
            .filter(|(name, _)| name.as_str() != attributes::HASH)
            .map(|(name, attr)| (name.as_str(), attr))
            .collect();
        let bytes = serde_json::to_vec(&payload)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Recomputes the digest and stores it in the `hash` attribute.
    pub fn refresh_hash(&mut self) -> CdfResult<String> {
        let hash = self.computed_hash()?;
        self.set_attribute(
            attributes::HASH,
            CdfAttribute::neutral(AttributeType::KEYWORD, hash.clone()),
        );
        Ok(hash)
    }

    /// Records a dependency on another object.
    pub fn add_dependency(&mut self, uuid: Uuid, hash: impl Into<String>) {
        if uuid != self.uuid {
            self.dependencies.insert(uuid, hash.into());
        }
    }

    /// Returns true if this object depends on `uuid`.
    pub fn depends_on(&self, uuid: &Uuid) -> bool {
        self.dependencies.contains_key(uuid)
    }

    /// Returns the dependency UUIDs in sorted order.
    pub fn dependency_uuids(&self) -> Vec<Uuid> {
        self.dependencies.keys().copied().collect()
    }

    /// Records a required capability once.
    pub fn add_module(&mut self, module: impl Into<String>) {
        let module = module.into();
        if !self.module_dependencies.contains(&module) {
            self.module_dependencies.push(module);
        }
    }

    /// Returns every UUID mentioned by reference attributes.
    ///
    /// Values that do not parse as UUIDs are ignored.
    pub fn referenced_uuids(&self) -> Vec<Uuid> {
        let mut found: Vec<Uuid> = self
            .attributes
            .values()
            .filter(|a| a.attr_type.is_reference())
            .flat_map(CdfAttribute::uuid_values)
            .collect();
        found.sort();
        found.dedup();
        found
    }
}
