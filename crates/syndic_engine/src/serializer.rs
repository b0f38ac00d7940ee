//! Serialization of local entities into CDF objects.

use crate::entity::LocalEntity;
use crate::error::SyncResult;
use crate::handlers::{HandlerChain, HandlerContext, SyncHandler};
use crate::host::DependencyWrapper;
use std::collections::HashMap;
use syndic_cdf::{
    attributes, AttributeKind, AttributeType, CdfAttribute, CdfDocument, CdfObject,
};
use uuid::Uuid;

/// Context for attribute population handlers.
#[derive(Debug)]
pub struct PopulateContext {
    /// The entity being serialized.
    pub entity: LocalEntity,
    /// The object under construction.
    pub object: CdfObject,
    stopped: bool,
}

impl PopulateContext {
    /// Stops the remaining handlers.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }
}

impl HandlerContext for PopulateContext {
    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }
}

/// Builds CDF objects from local entities.
#[derive(Debug)]
pub struct Serializer {
    origin: Uuid,
    populators: HandlerChain<PopulateContext>,
}

impl Serializer {
    /// Creates a serializer stamping `origin` on every object.
    pub fn new(origin: Uuid) -> Self {
        Self {
            origin,
            populators: HandlerChain::new(),
        }
    }

    /// Adds an attribute population handler, run after the built-in attributes.
    pub fn with_populator(mut self, handler: impl SyncHandler<PopulateContext> + 'static) -> Self {
        self.populators.register(handler);
        self
    }

    /// Serializes an entity.
    ///
    /// Dependency hashes are left empty; [`link_dependency_hashes`] fills
    /// them once every object of the document is built.
    pub fn serialize(&self, entity: &LocalEntity, wrapper: &DependencyWrapper) -> SyncResult<CdfObject> {
        let langcode = entity.langcode.as_str();
        let mut object = CdfObject::new(entity.uuid, entity.kind.cdf_type(), self.origin)
            .with_timestamps(entity.created.clone(), entity.modified.clone())
            .with_attribute(
                attributes::ENTITY_TYPE,
                CdfAttribute::neutral(AttributeType::KEYWORD, entity.entity_type.clone()),
            )
            .with_attribute(
                attributes::LANGCODE,
                CdfAttribute::neutral(AttributeType::KEYWORD, langcode),
            );
        if let Some(bundle) = &entity.bundle {
            object.set_attribute(
                attributes::BUNDLE,
                CdfAttribute::neutral(AttributeType::KEYWORD, bundle.clone()),
            );
        }
        if let Some(label) = &entity.label {
            object.set_attribute(
                attributes::LABEL,
                CdfAttribute::new(AttributeType::STRING).with_value(langcode, label.clone()),
            );
        }
        for (name, value) in &entity.fields {
            object.set_attribute(
                name.clone(),
                CdfAttribute::new(AttributeType::infer(value)).with_value(langcode, value.clone()),
            );
        }
        for (name, targets) in &entity.references {
            let targets: Vec<String> = targets.iter().map(Uuid::to_string).collect();
            object.set_attribute(
                name.clone(),
                CdfAttribute::neutral(AttributeType::Array(AttributeKind::Reference), targets),
            );
        }
        for dependency in &wrapper.dependencies {
            object.add_dependency(dependency.uuid, String::new());
        }
        for module in &wrapper.modules {
            object.add_module(module.clone());
        }

        let mut context = PopulateContext {
            entity: entity.clone(),
            object,
            stopped: false,
        };
        self.populators.dispatch(&mut context)?;
        let mut object = context.object;
        object.refresh_hash()?;
        Ok(object)
    }
}

/// Fills every dependency hash with the hash of the matching object in the
/// document. Dependencies outside the document keep their value.
pub fn link_dependency_hashes(document: &mut CdfDocument) {
    let hashes: HashMap<Uuid, String> = document
        .entities()
        .filter_map(|o| o.hash().map(|h| (o.uuid, h.to_string())))
        .collect();
    for object in document.entities_mut() {
        for (uuid, hash) in object.dependencies.iter_mut() {
            if let Some(known) = hashes.get(uuid) {
                hash.clone_from(known);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, EntityRef};
    use crate::error::SyncResult;
    use serde_json::json;
    use syndic_cdf::CdfType;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn article() -> LocalEntity {
        LocalEntity::new("node", uuid(1))
            .with_bundle("article")
            .with_label("Hello")
            .with_langcode("en")
            .with_field("body", "Text")
            .with_field("promoted", true)
            .with_reference("field_tags", vec![uuid(2)])
            .with_timestamps("1700000000", "1700000100")
    }

    fn wrapper() -> DependencyWrapper {
        DependencyWrapper {
            entity: EntityRef::new("node", uuid(1)),
            dependencies: vec![EntityRef::new("taxonomy_term", uuid(2))],
            modules: vec!["node".into()],
        }
    }

    #[test]
    fn serializes_fields_and_metadata() {
        let object = Serializer::new(uuid(100)).serialize(&article(), &wrapper()).unwrap();

        assert_eq!(object.cdf_type, CdfType::ContentEntity);
        assert_eq!(object.origin, uuid(100));
        assert_eq!(object.entity_type(), Some("node"));
        assert_eq!(object.label(), Some("Hello"));
        assert_eq!(object.attribute("body").unwrap().get_value("en"), Some(&json!("Text")));
        assert_eq!(
            object.attribute("promoted").unwrap().attr_type,
            AttributeType::Scalar(AttributeKind::Boolean)
        );
        assert_eq!(object.referenced_uuids(), vec![uuid(2)]);
        assert!(object.depends_on(&uuid(2)));
        assert_eq!(object.module_dependencies, vec!["node"]);
        assert_eq!(object.hash().map(str::to_string), Some(object.computed_hash().unwrap()));
    }

    #[test]
    fn config_entities_use_config_type() {
        let entity = LocalEntity::new("view", uuid(3)).with_kind(EntityKind::Config);
        let object = Serializer::new(uuid(100))
            .serialize(&entity, &DependencyWrapper::empty(&entity))
            .unwrap();
        assert_eq!(object.cdf_type, CdfType::ConfigEntity);
    }

    #[test]
    fn populators_run_before_hashing() {
        let plain = Serializer::new(uuid(100)).serialize(&article(), &wrapper()).unwrap();
        let extended = Serializer::new(uuid(100))
            .with_populator(|context: &mut PopulateContext| -> SyncResult<()> {
                let path = format!("/node/{}", context.entity.uuid);
                context
                    .object
                    .set_attribute("path", CdfAttribute::neutral(AttributeType::STRING, path));
                Ok(())
            })
            .serialize(&article(), &wrapper())
            .unwrap();

        assert!(extended.attribute("path").is_some());
        assert_ne!(plain.hash(), extended.hash());
    }

    #[test]
    fn hashes_are_linked_within_document() {
        let serializer = Serializer::new(uuid(100));
        let term = LocalEntity::new("taxonomy_term", uuid(2)).with_label("Rust");
        let mut document = CdfDocument::from_objects([
            serializer.serialize(&article(), &wrapper()).unwrap(),
            serializer.serialize(&term, &DependencyWrapper::empty(&term)).unwrap(),
        ]);
        link_dependency_hashes(&mut document);

        let term_hash = document.get(&uuid(2)).unwrap().hash().unwrap().to_string();
        assert_eq!(document.get(&uuid(1)).unwrap().dependencies[&uuid(2)], term_hash);
    }
}
