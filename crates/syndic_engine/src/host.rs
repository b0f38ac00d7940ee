//! Seams to the host repository: entity storage, capabilities and
//! dependency calculation.

use crate::context::ImportContext;
use crate::entity::{EntityRef, LocalEntity};
use crate::error::{SyncError, SyncResult};
use crate::stack::DependencyStack;
use crate::stub::StubLedger;
use parking_lot::RwLock;
use std::collections::HashSet;
use syndic_cdf::CdfObject;
use tracing::info;
use uuid::Uuid;

/// How the host maps an incoming CDF object to a local entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// An entity already exists (possibly under another UUID, or as a stub).
    Existing(LocalEntity),
    /// A new, unsaved entity was created for the object.
    Created(LocalEntity),
    /// The host refuses to import the object.
    Declined {
        /// Why the object was declined.
        reason: String,
    },
}

/// Entity storage of the host repository.
///
/// The engine never touches storage directly; every read and write goes
/// through this trait.
pub trait EntityHost: Send + Sync {
    /// Loads an entity by type and UUID.
    fn load(&self, entity_type: &str, uuid: &Uuid) -> SyncResult<Option<LocalEntity>>;

    /// Resolves an incoming object to a local entity.
    fn resolve(&self, object: &CdfObject, stack: &DependencyStack) -> SyncResult<Resolution>;

    /// Copies the object's attributes onto the entity.
    ///
    /// References to entities that are neither on the stack nor stored
    /// locally are satisfied with stubs, which must be recorded in `stubs`.
    fn populate(
        &self,
        entity: &mut LocalEntity,
        object: &CdfObject,
        stack: &DependencyStack,
        stubs: &mut StubLedger,
    ) -> SyncResult<()>;

    /// Persists an entity, assigning a local id on first save.
    fn save(&self, entity: &mut LocalEntity, context: &ImportContext) -> SyncResult<()>;

    /// Deletes an entity. Returns false if it did not exist.
    fn delete(&self, entity_type: &str, uuid: &Uuid, context: &ImportContext) -> SyncResult<bool>;
}

/// Installed optional functionality of the host repository.
pub trait CapabilityRegistry: Send + Sync {
    /// Returns true if the capability is available.
    fn is_available(&self, capability: &str) -> bool;

    /// Attempts to install a capability. Returns true on success.
    fn install(&self, _capability: &str) -> SyncResult<bool> {
        Ok(false)
    }

    /// Makes a capability available, installing it if needed.
    fn ensure(&self, capability: &str) -> SyncResult<()> {
        if self.is_available(capability) || self.install(capability)? {
            Ok(())
        } else {
            Err(SyncError::MissingCapability {
                capability: capability.to_string(),
            })
        }
    }
}

/// Capability registry backed by fixed sets.
#[derive(Debug, Default)]
pub struct StaticCapabilities {
    available: RwLock<HashSet<String>>,
    installable: HashSet<String>,
}

impl StaticCapabilities {
    /// Creates a registry with the given capabilities available.
    pub fn new<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: RwLock::new(available.into_iter().map(Into::into).collect()),
            installable: HashSet::new(),
        }
    }

    /// Allows capabilities to be installed on demand.
    pub fn with_installable<I, S>(mut self, installable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installable = installable.into_iter().map(Into::into).collect();
        self
    }
}

impl CapabilityRegistry for StaticCapabilities {
    fn is_available(&self, capability: &str) -> bool {
        self.available.read().contains(capability)
    }

    fn install(&self, capability: &str) -> SyncResult<bool> {
        if !self.installable.contains(capability) {
            return Ok(false);
        }
        info!(capability, "Installing capability");
        self.available.write().insert(capability.to_string());
        Ok(true)
    }
}

/// The transitive dependency set of a root entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyWrapper {
    /// The root entity.
    pub entity: EntityRef,
    /// Every entity the root transitively depends on, root excluded.
    pub dependencies: Vec<EntityRef>,
    /// Capabilities needed to store the root.
    pub modules: Vec<String>,
}

impl DependencyWrapper {
    /// A wrapper with no dependencies.
    pub fn empty(entity: &LocalEntity) -> Self {
        Self {
            entity: entity.entity_ref(),
            dependencies: Vec::new(),
            modules: Vec::new(),
        }
    }

    /// Returns the dependency UUIDs.
    pub fn dependency_uuids(&self) -> Vec<Uuid> {
        self.dependencies.iter().map(|d| d.uuid).collect()
    }
}

/// Computes what an entity depends on.
pub trait DependencyCalculator: Send + Sync {
    /// Returns the transitive dependency set of `entity`.
    fn calculate(&self, entity: &LocalEntity) -> SyncResult<DependencyWrapper>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_installs_when_allowed() {
        let registry = StaticCapabilities::new(["node"]).with_installable(["taxonomy"]);
        assert!(registry.ensure("node").is_ok());
        assert!(!registry.is_available("taxonomy"));
        assert!(registry.ensure("taxonomy").is_ok());
        assert!(registry.is_available("taxonomy"));

        let err = registry.ensure("paragraphs").unwrap_err();
        assert!(matches!(err, SyncError::MissingCapability { capability } if capability == "paragraphs"));
    }

    #[test]
    fn empty_wrapper() {
        let entity = LocalEntity::new("node", Uuid::from_u128(1));
        let wrapper = DependencyWrapper::empty(&entity);
        assert_eq!(wrapper.entity.uuid, entity.uuid);
        assert!(wrapper.dependency_uuids().is_empty());
    }
}
