//! CDF documents: ordered, UUID-keyed collections of objects.

use crate::error::CdfResult;
use crate::object::CdfObject;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A collection of CDF objects keyed by UUID, kept in insertion order.
///
/// # Invariants
///
/// - At most one object per UUID.
/// - [`has_entities`](Self::has_entities) is true iff at least one object is present.
/// - [`merge`](Self::merge) is a union by UUID where the incoming object wins and
///   the original position is kept.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WireDocument")]
pub struct CdfDocument {
    objects: Vec<CdfObject>,
    index: HashMap<Uuid, usize>,
    scroll_id: Option<String>,
}

#[derive(Deserialize)]
struct WireDocument {
    #[serde(default)]
    entities: Vec<CdfObject>,
    #[serde(default)]
    scroll_id: Option<String>,
}

#[derive(Serialize)]
struct WireDocumentRef<'a> {
    entities: &'a [CdfObject],
    #[serde(skip_serializing_if = "Option::is_none")]
    scroll_id: &'a Option<String>,
}

impl From<WireDocument> for CdfDocument {
    fn from(wire: WireDocument) -> Self {
        let mut document = CdfDocument::from_objects(wire.entities);
        document.scroll_id = wire.scroll_id;
        document
    }
}

impl Serialize for CdfDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireDocumentRef {
            entities: &self.objects,
            scroll_id: &self.scroll_id,
        }
        .serialize(serializer)
    }
}

impl CdfDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document from objects; later duplicates replace earlier ones.
    pub fn from_objects(objects: impl IntoIterator<Item = CdfObject>) -> Self {
        let mut document = Self::new();
        for object in objects {
            document.add(object);
        }
        document
    }

    /// Returns true if the document holds at least one object.
    pub fn has_entities(&self) -> bool {
        !self.objects.is_empty()
    }

    /// Returns the number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Gets an object by UUID.
    pub fn get(&self, uuid: &Uuid) -> Option<&CdfObject> {
        self.index.get(uuid).map(|&i| &self.objects[i])
    }

    /// Gets an object mutably by UUID.
    pub fn get_mut(&mut self, uuid: &Uuid) -> Option<&mut CdfObject> {
        match self.index.get(uuid) {
            Some(&i) => self.objects.get_mut(i),
            None => None,
        }
    }

    /// Returns true if an object with this UUID is present.
    pub fn contains(&self, uuid: &Uuid) -> bool {
        self.index.contains_key(uuid)
    }

    /// Adds an object, replacing any object with the same UUID in place.
    ///
    /// Returns the replaced object, if any.
    pub fn add(&mut self, object: CdfObject) -> Option<CdfObject> {
        match self.index.get(&object.uuid) {
            Some(&i) => Some(std::mem::replace(&mut self.objects[i], object)),
            None => {
                self.index.insert(object.uuid, self.objects.len());
                self.objects.push(object);
                None
            }
        }
    }

    /// Removes an object by UUID.
    pub fn remove(&mut self, uuid: &Uuid) -> Option<CdfObject> {
        let position = self.index.remove(uuid)?;
        let removed = self.objects.remove(position);
        self.reindex();
        Some(removed)
    }

    /// Keeps only the objects for which `keep` returns true.
    ///
    /// Returns the removed objects in document order.
    pub fn retain(&mut self, mut keep: impl FnMut(&CdfObject) -> bool) -> Vec<CdfObject> {
        let (kept, removed): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.objects).into_iter().partition(|o| keep(o));
        self.objects = kept;
        self.reindex();
        removed
    }

    /// Merges another document into this one; the other document's objects win.
    pub fn merge(&mut self, other: CdfDocument) {
        if other.scroll_id.is_some() {
            self.scroll_id = other.scroll_id;
        }
        for object in other.objects {
            self.add(object);
        }
    }

    /// Iterates objects in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = &CdfObject> {
        self.objects.iter()
    }

    /// Iterates objects mutably in insertion order.
    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut CdfObject> {
        self.objects.iter_mut()
    }

    /// Returns the UUIDs in insertion order.
    pub fn uuids(&self) -> Vec<Uuid> {
        self.objects.iter().map(|o| o.uuid).collect()
    }

    /// Consumes the document, returning its objects in insertion order.
    pub fn into_objects(self) -> Vec<CdfObject> {
        self.objects
    }

    /// Returns dependency UUIDs declared by some object but absent from the document.
    pub fn missing_dependencies(&self) -> BTreeSet<Uuid> {
        self.objects
            .iter()
            .flat_map(|o| o.dependencies.keys())
            .filter(|uuid| !self.contains(uuid))
            .copied()
            .collect()
    }

    /// Returns the union of required capabilities, in first-seen order.
    pub fn module_dependencies(&self) -> Vec<String> {
        let mut modules: Vec<String> = Vec::new();
        for module in self.objects.iter().flat_map(|o| o.module_dependencies.iter()) {
            if !modules.contains(module) {
                modules.push(module.clone());
            }
        }
        modules
    }

    /// Returns the scroll cursor, if the document is one page of a larger result.
    pub fn scroll_id(&self) -> Option<&str> {
        self.scroll_id.as_deref()
    }

    /// Sets the scroll cursor.
    pub fn set_scroll_id(&mut self, scroll_id: Option<String>) {
        self.scroll_id = scroll_id;
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CdfResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CdfResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn reindex(&mut self) {
        self.index = self
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.uuid, i))
            .collect();
    }
}

impl FromIterator<CdfObject> for CdfDocument {
    fn from_iter<T: IntoIterator<Item = CdfObject>>(iter: T) -> Self {
        Self::from_objects(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::CdfType;
    use serde_json::json;

    fn object(n: u128) -> CdfObject {
        CdfObject::new(Uuid::from_u128(n), CdfType::ContentEntity, Uuid::from_u128(1000))
    }

    #[test]
    fn empty_document_has_no_entities() {
        let document = CdfDocument::new();
        assert!(!document.has_entities());
        assert!(document.is_empty());
    }

    #[test]
    fn add_replaces_in_place() {
        let mut document = CdfDocument::from_objects([object(1), object(2), object(3)]);
        let replacement = object(2).with_timestamps("a", "b");
        let previous = document.add(replacement);

        assert!(previous.is_some());
        assert_eq!(document.len(), 3);
        assert_eq!(
            document.uuids(),
            vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)]
        );
        assert_eq!(document.get(&Uuid::from_u128(2)).unwrap().created, "a");
    }

    #[test]
    fn merge_later_wins() {
        let mut first = CdfDocument::from_objects([object(1), object(2)]);
        let second = CdfDocument::from_objects([object(2).with_timestamps("new", "new"), object(3)]);
        first.merge(second);

        assert_eq!(first.len(), 3);
        assert_eq!(first.get(&Uuid::from_u128(2)).unwrap().modified, "new");
        assert_eq!(first.uuids()[2], Uuid::from_u128(3));
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut document = CdfDocument::from_objects([object(1), object(2), object(3)]);
        assert!(document.remove(&Uuid::from_u128(1)).is_some());
        assert!(document.remove(&Uuid::from_u128(1)).is_none());
        assert_eq!(document.get(&Uuid::from_u128(3)).unwrap().uuid, Uuid::from_u128(3));
        assert_eq!(document.len(), 2);
    }

    #[test]
    fn retain_returns_removed() {
        let mut document = CdfDocument::from_objects([object(1), object(2), object(3)]);
        let removed = document.retain(|o| o.uuid != Uuid::from_u128(2));
        assert_eq!(removed.len(), 1);
        assert!(!document.contains(&Uuid::from_u128(2)));
        assert!(document.get(&Uuid::from_u128(3)).is_some());
    }

    #[test]
    fn missing_dependencies_and_modules() {
        let document = CdfDocument::from_objects([
            object(1)
                .with_dependency(Uuid::from_u128(2), "h")
                .with_dependency(Uuid::from_u128(9), "h")
                .with_module("node"),
            object(2).with_module("taxonomy").with_module("node"),
        ]);
        let missing: Vec<_> = document.missing_dependencies().into_iter().collect();
        assert_eq!(missing, vec![Uuid::from_u128(9)]);
        assert_eq!(document.module_dependencies(), vec!["node", "taxonomy"]);
    }

    #[test]
    fn wire_format() {
        let document = CdfDocument::from_objects([object(1)]);
        let value = serde_json::to_value(&document).unwrap();
        assert!(value.get("scroll_id").is_none());
        assert_eq!(value["entities"][0]["uuid"], json!(Uuid::from_u128(1).to_string()));

        let decoded = CdfDocument::decode(&document.encode().unwrap()).unwrap();
        assert_eq!(decoded, document);
    }

    #[test]
    fn decode_collapses_duplicate_uuids() {
        let raw = json!({
            "entities": [
                {"uuid": Uuid::from_u128(1).to_string(), "type": "content_entity", "origin": Uuid::from_u128(5).to_string(), "created": "old"},
                {"uuid": Uuid::from_u128(1).to_string(), "type": "content_entity", "origin": Uuid::from_u128(5).to_string(), "created": "new"}
            ],
            "scroll_id": "page-2"
        });
        let document: CdfDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document.get(&Uuid::from_u128(1)).unwrap().created, "new");
        assert_eq!(document.scroll_id(), Some("page-2"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn one_object_per_uuid_in_first_seen_order(ids in prop::collection::vec(0u128..16, 0..40)) {
                let document = CdfDocument::from_objects(ids.iter().map(|&n| object(n)));

                let mut expected: Vec<Uuid> = Vec::new();
                for &n in &ids {
                    let uuid = Uuid::from_u128(n);
                    if !expected.contains(&uuid) {
                        expected.push(uuid);
                    }
                }
                prop_assert_eq!(document.uuids(), expected);
                prop_assert_eq!(document.has_entities(), !ids.is_empty());
            }
        }
    }
}
