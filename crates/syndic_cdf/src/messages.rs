//! Wire messages: work queue items, republish requests and webhook payloads.

use crate::error::{CdfError, CdfResult};
use crate::object::{CdfObject, CdfType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status value carried by successful webhook notifications.
pub const STATUS_SUCCESSFUL: &str = "successful";

/// Operation named by a webhook notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crud {
    /// Entities were created or updated.
    Update,
    /// Entities were deleted.
    Delete,
    /// An origin is asked to publish an entity again.
    Republish,
    /// Any operation this version does not handle.
    #[serde(other)]
    Unknown,
}

/// Export work item: one local entity to serialize and publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportQueueItem {
    /// Local entity type.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Entity UUID.
    pub uuid: Uuid,
    /// Whether dependencies are calculated and exported too; absent means yes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculate_dependencies: Option<bool>,
}

impl ExportQueueItem {
    /// Creates an item that calculates dependencies.
    pub fn new(entity_type: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            uuid,
            calculate_dependencies: None,
        }
    }

    /// Sets whether dependencies are calculated.
    pub fn with_calculate_dependencies(mut self, calculate: bool) -> Self {
        self.calculate_dependencies = Some(calculate);
        self
    }

    /// Returns true unless dependency calculation was explicitly turned off.
    pub fn should_calculate_dependencies(&self) -> bool {
        self.calculate_dependencies.unwrap_or(true)
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CdfResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CdfResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Import work item: UUIDs resolved and ingested together as one closure batch.
///
/// The UUIDs travel as a single comma-and-space-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportQueueItem {
    /// `"uuid-a, uuid-b"`.
    pub uuids: String,
}

impl ImportQueueItem {
    /// Creates an item from a list of UUIDs.
    pub fn from_uuids<'a>(uuids: impl IntoIterator<Item = &'a Uuid>) -> Self {
        let joined = uuids
            .into_iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self { uuids: joined }
    }

    /// Parses the UUID list, skipping empty segments.
    pub fn uuid_list(&self) -> CdfResult<Vec<Uuid>> {
        self.uuids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s).map_err(|_| CdfError::InvalidUuid {
                    value: s.to_string(),
                })
            })
            .collect()
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CdfResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CdfResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The object summary carried by a republish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepublishCdf {
    /// UUID of the object to republish.
    pub uuid: Uuid,
    /// Object type.
    #[serde(rename = "type")]
    pub cdf_type: CdfType,
    /// Dependency UUIDs the subscriber saw.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
}

/// Best-effort request asking an origin to publish an entity again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepublishRequest {
    /// Always `"successful"`.
    pub status: String,
    /// UUID of the object to republish.
    pub uuid: Uuid,
    /// Always [`Crud::Republish`].
    pub crud: Crud,
    /// UUID of the requesting repository.
    pub initiator: Uuid,
    /// Summary of the incomplete object.
    pub cdf: RepublishCdf,
}

impl RepublishRequest {
    /// Builds a republish request for an object whose closure is incomplete.
    pub fn for_object(object: &CdfObject, initiator: Uuid) -> Self {
        Self {
            status: STATUS_SUCCESSFUL.to_string(),
            uuid: object.uuid,
            crud: Crud::Republish,
            initiator,
            cdf: RepublishCdf {
                uuid: object.uuid,
                cdf_type: object.cdf_type,
                dependencies: object.dependency_uuids(),
            },
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CdfResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CdfResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An asset named by a webhook notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAsset {
    /// Asset UUID.
    pub uuid: Uuid,
    /// Asset type.
    #[serde(rename = "type")]
    pub asset_type: CdfType,
}

/// An inbound webhook notification, already verified by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Delivery status reported by the hub.
    pub status: String,
    /// Operation.
    pub crud: Crud,
    /// Affected assets.
    #[serde(default)]
    pub assets: Vec<WebhookAsset>,
    /// Repository that caused the notification.
    pub initiator: Uuid,
}

impl WebhookPayload {
    /// Creates a successful notification.
    pub fn successful(crud: Crud, initiator: Uuid, assets: Vec<WebhookAsset>) -> Self {
        Self {
            status: STATUS_SUCCESSFUL.to_string(),
            crud,
            assets,
            initiator,
        }
    }

    /// Returns true if the hub reported success.
    pub fn is_successful(&self) -> bool {
        self.status == STATUS_SUCCESSFUL
    }

    /// Returns the asset UUIDs.
    pub fn asset_uuids(&self) -> Vec<Uuid> {
        self.assets.iter().map(|a| a.uuid).collect()
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CdfResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CdfResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn export_item_defaults_to_calculating() {
        let item: ExportQueueItem =
            serde_json::from_value(json!({"type": "node", "uuid": Uuid::from_u128(1).to_string()}))
                .unwrap();
        assert!(item.should_calculate_dependencies());
        assert!(!item
            .clone()
            .with_calculate_dependencies(false)
            .should_calculate_dependencies());

        let encoded = serde_json::to_value(&item).unwrap();
        assert!(encoded.get("calculate_dependencies").is_none());
        assert_eq!(encoded["type"], json!("node"));
    }

    #[test]
    fn import_item_joins_and_parses() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let item = ImportQueueItem::from_uuids(&[a, b]);
        assert_eq!(item.uuids, format!("{}, {}", a, b));
        assert_eq!(item.uuid_list().unwrap(), vec![a, b]);

        let sloppy = ImportQueueItem {
            uuids: format!(" {},,{} ,", a, b),
        };
        assert_eq!(sloppy.uuid_list().unwrap(), vec![a, b]);

        let broken = ImportQueueItem {
            uuids: "nope".into(),
        };
        assert!(matches!(broken.uuid_list(), Err(CdfError::InvalidUuid { .. })));
    }

    #[test]
    fn republish_payload_shape() {
        let object = CdfObject::new(Uuid::from_u128(7), CdfType::ContentEntity, Uuid::from_u128(8))
            .with_dependency(Uuid::from_u128(9), "h");
        let request = RepublishRequest::for_object(&object, Uuid::from_u128(3));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["status"], json!("successful"));
        assert_eq!(value["crud"], json!("republish"));
        assert_eq!(value["initiator"], json!(Uuid::from_u128(3).to_string()));
        assert_eq!(value["cdf"]["type"], json!("content_entity"));
        assert_eq!(
            value["cdf"]["dependencies"],
            json!([Uuid::from_u128(9).to_string()])
        );
        assert_eq!(RepublishRequest::decode(&request.encode().unwrap()).unwrap(), request);
    }

    #[test]
    fn webhook_payload_decodes() {
        let raw = json!({
            "status": "successful",
            "crud": "update",
            "assets": [{"uuid": Uuid::from_u128(1).to_string(), "type": "config_entity"}],
            "initiator": Uuid::from_u128(2).to_string()
        });
        let payload: WebhookPayload = serde_json::from_value(raw).unwrap();
        assert!(payload.is_successful());
        assert_eq!(payload.crud, Crud::Update);
        assert_eq!(payload.asset_uuids(), vec![Uuid::from_u128(1)]);
        assert_eq!(payload.assets[0].asset_type, CdfType::ConfigEntity);

        let odd: WebhookPayload = serde_json::from_value(json!({
            "status": "pending", "crud": "purge", "initiator": Uuid::from_u128(2).to_string()
        }))
        .unwrap();
        assert_eq!(odd.crud, Crud::Unknown);
        assert!(!odd.is_successful());
    }
}
