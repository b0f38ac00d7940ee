//! Engine-facing view of a hub for one registered client.

use crate::hub::ContentHub;
use std::sync::Arc;
use syndic_cdf::{CdfDocument, InterestEntry, SiteRole};
use syndic_engine::{
    DependencyResolverClient, ExportTarget, InterestListClient, SyncResult, WebhookDirectory,
};
use tracing::trace;
use uuid::Uuid;

/// Connects one repository to an in-process [`ContentHub`].
///
/// Every engine seam that talks to the hub is implemented here, so a site
/// can be wired with clones of the same client.
#[derive(Debug, Clone)]
pub struct HubClient {
    hub: Arc<ContentHub>,
    client_uuid: Uuid,
}

impl HubClient {
    /// Creates a client acting as `client_uuid`.
    pub fn new(hub: Arc<ContentHub>, client_uuid: Uuid) -> Self {
        Self { hub, client_uuid }
    }

    /// The UUID this client publishes as.
    pub fn client_uuid(&self) -> Uuid {
        self.client_uuid
    }

    /// The hub.
    pub fn hub(&self) -> &Arc<ContentHub> {
        &self.hub
    }
}

impl DependencyResolverClient for HubClient {
    fn fetch_entities(&self, uuids: &[Uuid]) -> SyncResult<CdfDocument> {
        trace!(client = %self.client_uuid, count = uuids.len(), "Fetching from hub");
        Ok(self.hub.fetch(uuids)?)
    }
}

impl ExportTarget for HubClient {
    fn publish(&self, document: &CdfDocument) -> SyncResult<()> {
        self.hub.publish(self.client_uuid, document)?;
        Ok(())
    }
}

impl InterestListClient for HubClient {
    fn add_entities(&self, webhook: &Uuid, entries: &[InterestEntry]) -> SyncResult<()> {
        self.hub.add_interests(webhook, entries)?;
        Ok(())
    }

    fn remove_entities(&self, webhook: &Uuid, role: SiteRole, uuids: &[Uuid]) -> SyncResult<()> {
        self.hub.remove_interests(webhook, role, uuids)?;
        Ok(())
    }

    fn list_entities(&self, webhook: &Uuid, role: SiteRole) -> SyncResult<Vec<InterestEntry>> {
        Ok(self.hub.list_interests(webhook, role)?)
    }
}

impl WebhookDirectory for HubClient {
    fn webhook_url(&self, client: &Uuid) -> SyncResult<Option<String>> {
        Ok(self.hub.webhook_url(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use syndic_cdf::{CdfObject, CdfType};
    use syndic_engine::SyncError;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn connected() -> HubClient {
        let hub = Arc::new(ContentHub::new(HubConfig::default()));
        hub.register_client(uuid(1), "site").unwrap();
        hub.register_webhook(uuid(10), uuid(1), "https://site/webhook").unwrap();
        HubClient::new(hub, uuid(1))
    }

    #[test]
    fn publishes_and_fetches_through_engine_traits() {
        let client = connected();
        let document =
            CdfDocument::from_objects([CdfObject::new(uuid(5), CdfType::ContentEntity, uuid(1))]);
        ExportTarget::publish(&client, &document).unwrap();

        let fetched = client.fetch_entities(&[uuid(5), uuid(6)]).unwrap();
        assert_eq!(fetched.uuids(), vec![uuid(5)]);
        assert_eq!(
            client.webhook_url(&uuid(1)).unwrap().as_deref(),
            Some("https://site/webhook")
        );
        assert_eq!(client.webhook_url(&uuid(2)).unwrap(), None);
    }

    #[test]
    fn hub_errors_map_to_sync_errors() {
        let client = connected();
        let err = client.list_entities(&uuid(99), SiteRole::Publisher).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(!err.is_retryable());

        client.hub().set_available(false);
        let err = client.fetch_entities(&[uuid(5)]).unwrap_err();
        assert!(err.is_retryable());
    }
}
