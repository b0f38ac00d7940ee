//! Test fixtures: identities, CDF objects and local entities.
//!
//! Objects built here carry the attributes the in-memory host needs to
//! materialize them, and their hashes are always current.

use std::sync::Once;
use syndic_cdf::{attributes, AttributeType, CdfAttribute, CdfDocument, CdfObject, CdfType};
use syndic_engine::{link_dependency_hashes, LocalEntity};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Deterministic UUID for small test numbers.
pub fn uuid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Deterministic UUIDs for a list of test numbers.
pub fn uuids(ns: &[u128]) -> Vec<Uuid> {
    ns.iter().map(|&n| uuid(n)).collect()
}

/// Builder for hashed CDF objects.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    object: CdfObject,
}

impl ObjectBuilder {
    /// Starts a content object of entity type `node`.
    pub fn new(n: u128, origin: Uuid) -> Self {
        let object = CdfObject::new(uuid(n), CdfType::ContentEntity, origin)
            .with_timestamps("2024-01-01T00:00:00Z", "2024-01-01T00:00:00Z")
            .with_attribute(
                attributes::ENTITY_TYPE,
                CdfAttribute::neutral(AttributeType::KEYWORD, "node"),
            )
            .with_attribute(
                attributes::LABEL,
                CdfAttribute::neutral(AttributeType::STRING, format!("object {}", n)),
            );
        Self { object }
    }

    /// Sets the entity type attribute.
    pub fn entity_type(mut self, entity_type: &str) -> Self {
        self.object.set_attribute(
            attributes::ENTITY_TYPE,
            CdfAttribute::neutral(AttributeType::KEYWORD, entity_type),
        );
        self
    }

    /// Sets the label attribute.
    pub fn label(mut self, label: &str) -> Self {
        self.object.set_attribute(
            attributes::LABEL,
            CdfAttribute::neutral(AttributeType::STRING, label),
        );
        self
    }

    /// Adds dependencies; hashes are filled by [`document`].
    pub fn depends_on(mut self, ns: &[u128]) -> Self {
        for &n in ns {
            self.object.add_dependency(uuid(n), String::new());
        }
        self
    }

    /// Adds a required capability.
    pub fn module(mut self, module: &str) -> Self {
        self.object.add_module(module);
        self
    }

    /// Finishes the object with a fresh hash.
    pub fn build(mut self) -> CdfObject {
        self.object
            .refresh_hash()
            .expect("Failed to hash test object");
        self.object
    }
}

/// Shorthand for a `node` object with dependencies.
pub fn object(n: u128, origin: Uuid, deps: &[u128]) -> CdfObject {
    ObjectBuilder::new(n, origin).depends_on(deps).build()
}

/// Collects objects into a document and links dependency hashes.
pub fn document(objects: impl IntoIterator<Item = CdfObject>) -> CdfDocument {
    let mut document = CdfDocument::from_objects(objects);
    link_dependency_hashes(&mut document);
    document
}

/// A small article graph: node 1 tags term 2, which was authored by user 3.
///
/// Inserted in reverse so the host assigns ids leaf-first.
pub fn article_entities() -> Vec<LocalEntity> {
    vec![
        LocalEntity::new("user", uuid(3)).with_label("editor"),
        LocalEntity::new("taxonomy_term", uuid(2))
            .with_label("news")
            .with_reference("uid", vec![uuid(3)]),
        LocalEntity::new("node", uuid(1))
            .with_label("Hello")
            .with_field("body", "First post")
            .with_reference("field_tags", vec![uuid(2)]),
    ]
}

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
