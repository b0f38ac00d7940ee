//! The content hub.

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syndic_cdf::{
    CdfDocument, CdfObject, Crud, InterestEntry, SiteRole, WebhookAsset, WebhookPayload,
};
use syndic_engine::HttpClient;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A registered repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    /// Client UUID.
    pub uuid: Uuid,
    /// Human-readable name.
    pub name: String,
}

/// A registered webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRecord {
    /// Webhook UUID.
    pub uuid: Uuid,
    /// Owning client.
    pub client: Uuid,
    /// Delivery URL.
    pub url: String,
}

/// A notification waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Target URL.
    pub url: String,
    /// The notification.
    pub payload: WebhookPayload,
}

/// Counters from flushing the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Notifications answered with 2xx.
    pub delivered: usize,
    /// Notifications that failed; they are not retried.
    pub failed: usize,
}

/// In-memory content hub.
///
/// The hub stores the latest published version of every object, the client
/// and webhook registry, and per-webhook interest lists. Publishing queues
/// notifications in an outbox; [`ContentHub::deliver_pending`] sends them
/// through the configured HTTP client.
///
/// # Example
///
/// ```
/// use syndic_hub::{ContentHub, HubConfig};
/// use syndic_cdf::{CdfDocument, CdfObject, CdfType};
/// use uuid::Uuid;
///
/// let hub = ContentHub::new(HubConfig::default());
/// let origin = Uuid::from_u128(1);
/// hub.register_client(origin, "publisher").unwrap();
///
/// let object = CdfObject::new(Uuid::from_u128(2), CdfType::ContentEntity, origin);
/// hub.publish(origin, &CdfDocument::from_objects([object])).unwrap();
/// assert_eq!(hub.len(), 1);
/// ```
pub struct ContentHub {
    config: HubConfig,
    clients: RwLock<HashMap<Uuid, ClientRecord>>,
    webhooks: RwLock<BTreeMap<Uuid, WebhookRecord>>,
    objects: RwLock<BTreeMap<Uuid, CdfObject>>,
    interests: RwLock<HashMap<(Uuid, SiteRole), BTreeMap<Uuid, InterestEntry>>>,
    outbox: Mutex<VecDeque<Delivery>>,
    transport: RwLock<Option<Arc<dyn HttpClient>>>,
    available: AtomicBool,
}

impl ContentHub {
    /// Creates an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            webhooks: RwLock::new(BTreeMap::new()),
            objects: RwLock::new(BTreeMap::new()),
            interests: RwLock::new(HashMap::new()),
            outbox: Mutex::new(VecDeque::new()),
            transport: RwLock::new(None),
            available: AtomicBool::new(true),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Sets the HTTP client used for webhook deliveries.
    pub fn set_transport(&self, transport: Arc<dyn HttpClient>) {
        *self.transport.write() = Some(transport);
    }

    /// Takes the hub offline or back online.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> HubResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HubError::Unavailable)
        }
    }

    /// Registers a client. Registering again renames it.
    pub fn register_client(&self, uuid: Uuid, name: impl Into<String>) -> HubResult<()> {
        self.ensure_available()?;
        if uuid.is_nil() {
            return Err(HubError::InvalidRequest("client uuid must not be nil".into()));
        }
        let name = name.into();
        info!(client = %uuid, name = %name, "Client registered");
        self.clients.write().insert(uuid, ClientRecord { uuid, name });
        Ok(())
    }

    /// Returns a registered client.
    pub fn client(&self, uuid: &Uuid) -> Option<ClientRecord> {
        self.clients.read().get(uuid).cloned()
    }

    /// Registers a webhook for a client.
    pub fn register_webhook(&self, webhook: Uuid, client: Uuid, url: impl Into<String>) -> HubResult<()> {
        self.ensure_available()?;
        self.require_client(&client)?;
        let url = url.into();
        debug!(webhook = %webhook, client = %client, url = %url, "Webhook registered");
        self.webhooks.write().insert(
            webhook,
            WebhookRecord {
                uuid: webhook,
                client,
                url,
            },
        );
        Ok(())
    }

    /// Removes a webhook and its interest lists.
    pub fn unregister_webhook(&self, webhook: &Uuid) -> bool {
        let removed = self.webhooks.write().remove(webhook).is_some();
        if removed {
            self.interests.write().retain(|(owner, _), _| owner != webhook);
        }
        removed
    }

    /// Returns the first webhook URL registered by a client.
    pub fn webhook_url(&self, client: &Uuid) -> Option<String> {
        self.webhooks
            .read()
            .values()
            .find(|w| w.client == *client)
            .map(|w| w.url.clone())
    }

    /// Stores the objects of a document and queues notifications.
    ///
    /// The origin's webhooks receive a confirmation; other webhooks receive
    /// an update for the objects on their subscriber interest list (or for
    /// every object when broadcasting). Returns the number of objects stored.
    pub fn publish(&self, origin: Uuid, document: &CdfDocument) -> HubResult<usize> {
        self.ensure_available()?;
        self.require_client(&origin)?;
        if !document.has_entities() {
            return Err(HubError::InvalidRequest("document has no entities".into()));
        }

        let assets: Vec<WebhookAsset> = document
            .entities()
            .map(|o| WebhookAsset {
                uuid: o.uuid,
                asset_type: o.cdf_type,
            })
            .collect();
        {
            let mut objects = self.objects.write();
            for object in document.entities() {
                objects.insert(object.uuid, object.clone());
            }
        }

        let mut queued = Vec::new();
        for webhook in self.webhooks.read().values() {
            if webhook.client == origin {
                if self.config.confirm_publishes {
                    queued.push(Delivery {
                        url: webhook.url.clone(),
                        payload: WebhookPayload::successful(Crud::Update, origin, assets.clone()),
                    });
                }
                continue;
            }
            let wanted = self.interested_assets(webhook, &assets);
            if !wanted.is_empty() {
                queued.push(Delivery {
                    url: webhook.url.clone(),
                    payload: WebhookPayload::successful(Crud::Update, origin, wanted),
                });
            }
        }

        info!(origin = %origin, objects = assets.len(), notifications = queued.len(), "Document published");
        self.outbox.lock().extend(queued);
        Ok(assets.len())
    }

    /// Removes objects published by `origin` and notifies interested webhooks.
    pub fn delete(&self, origin: Uuid, uuids: &[Uuid]) -> HubResult<usize> {
        self.ensure_available()?;
        self.require_client(&origin)?;

        let mut removed = Vec::new();
        {
            let mut objects = self.objects.write();
            for uuid in uuids {
                match objects.get(uuid) {
                    Some(object) if object.origin == origin => {
                        if let Some(object) = objects.remove(uuid) {
                            removed.push(WebhookAsset {
                                uuid: object.uuid,
                                asset_type: object.cdf_type,
                            });
                        }
                    }
                    Some(_) => warn!(uuid = %uuid, origin = %origin, "Delete refused, not the origin"),
                    None => {}
                }
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }

        let mut queued = Vec::new();
        for webhook in self.webhooks.read().values() {
            if webhook.client == origin {
                continue;
            }
            let wanted = self.interested_assets(webhook, &removed);
            if !wanted.is_empty() {
                queued.push(Delivery {
                    url: webhook.url.clone(),
                    payload: WebhookPayload::successful(Crud::Delete, origin, wanted),
                });
            }
        }
        info!(origin = %origin, objects = removed.len(), "Objects deleted");
        self.outbox.lock().extend(queued);
        Ok(removed.len())
    }

    /// Returns the stored objects among `uuids`, in request order.
    pub fn fetch(&self, uuids: &[Uuid]) -> HubResult<CdfDocument> {
        self.ensure_available()?;
        if uuids.len() > self.config.max_fetch_batch {
            return Err(HubError::BatchTooLarge {
                size: uuids.len(),
                limit: self.config.max_fetch_batch,
            });
        }
        let objects = self.objects.read();
        Ok(uuids.iter().filter_map(|u| objects.get(u).cloned()).collect())
    }

    /// Returns one stored object.
    pub fn object(&self, uuid: &Uuid) -> Option<CdfObject> {
        self.objects.read().get(uuid).cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Adds interest entries. Existing entries are kept.
    pub fn add_interests(&self, webhook: &Uuid, entries: &[InterestEntry]) -> HubResult<usize> {
        self.ensure_available()?;
        self.require_webhook(webhook)?;
        let mut interests = self.interests.write();
        let mut added = 0;
        for entry in entries {
            let list = interests.entry((*webhook, entry.site_role)).or_default();
            if !list.contains_key(&entry.uuid) {
                list.insert(entry.uuid, entry.clone());
                added += 1;
            }
        }
        debug!(webhook = %webhook, added, "Interest entries added");
        Ok(added)
    }

    /// Removes UUIDs from one interest list.
    pub fn remove_interests(&self, webhook: &Uuid, role: SiteRole, uuids: &[Uuid]) -> HubResult<usize> {
        self.ensure_available()?;
        self.require_webhook(webhook)?;
        let mut interests = self.interests.write();
        let Some(list) = interests.get_mut(&(*webhook, role)) else {
            return Ok(0);
        };
        Ok(uuids.iter().filter(|u| list.remove(u).is_some()).count())
    }

    /// Lists one interest list.
    pub fn list_interests(&self, webhook: &Uuid, role: SiteRole) -> HubResult<Vec<InterestEntry>> {
        self.ensure_available()?;
        self.require_webhook(webhook)?;
        Ok(self
            .interests
            .read()
            .get(&(*webhook, role))
            .map(|list| list.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Notifications waiting in the outbox.
    pub fn pending_deliveries(&self) -> Vec<Delivery> {
        self.outbox.lock().iter().cloned().collect()
    }

    /// Sends every queued notification.
    ///
    /// Without a transport the outbox is left untouched.
    pub fn deliver_pending(&self) -> DeliveryReport {
        let Some(transport) = self.transport.read().clone() else {
            warn!("No webhook transport configured, deliveries kept");
            return DeliveryReport::default();
        };
        let pending: Vec<Delivery> = self.outbox.lock().drain(..).collect();

        let mut report = DeliveryReport::default();
        for delivery in pending {
            let body = match delivery.payload.encode() {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %delivery.url, error = %e, "Failed to encode notification");
                    report.failed += 1;
                    continue;
                }
            };
            match transport.post(&delivery.url, body) {
                Ok(response) if response.is_success() => report.delivered += 1,
                Ok(response) => {
                    warn!(url = %delivery.url, status = response.status, body = %response.text(), "Webhook rejected notification");
                    report.failed += 1;
                }
                Err(message) => {
                    warn!(url = %delivery.url, error = %message, "Webhook delivery failed");
                    report.failed += 1;
                }
            }
        }
        if report.delivered + report.failed > 0 {
            info!(delivered = report.delivered, failed = report.failed, "Webhook deliveries sent");
        }
        report
    }

    fn interested_assets(&self, webhook: &WebhookRecord, assets: &[WebhookAsset]) -> Vec<WebhookAsset> {
        if self.config.broadcast_updates {
            return assets.to_vec();
        }
        let interests = self.interests.read();
        let Some(list) = interests.get(&(webhook.uuid, SiteRole::Subscriber)) else {
            return Vec::new();
        };
        assets
            .iter()
            .filter(|a| list.contains_key(&a.uuid))
            .cloned()
            .collect()
    }

    fn require_client(&self, client: &Uuid) -> HubResult<()> {
        if self.clients.read().contains_key(client) {
            Ok(())
        } else {
            Err(HubError::UnknownClient(*client))
        }
    }

    fn require_webhook(&self, webhook: &Uuid) -> HubResult<()> {
        if self.webhooks.read().contains_key(webhook) {
            Ok(())
        } else {
            Err(HubError::UnknownWebhook(*webhook))
        }
    }
}

impl std::fmt::Debug for ContentHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHub")
            .field("config", &self.config)
            .field("clients", &self.clients.read().len())
            .field("webhooks", &self.webhooks.read().len())
            .field("objects", &self.objects.read().len())
            .field("outbox", &self.outbox.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syndic_cdf::{CdfType, InterestReason, TrackingStatus};
    use syndic_engine::{HttpResponse, RecordingHttpClient};

    const PUBLISHER: u128 = 1;
    const SUBSCRIBER: u128 = 2;
    const PUB_HOOK: u128 = 11;
    const SUB_HOOK: u128 = 12;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn hub(config: HubConfig) -> ContentHub {
        let hub = ContentHub::new(config);
        hub.register_client(uuid(PUBLISHER), "publisher").unwrap();
        hub.register_client(uuid(SUBSCRIBER), "subscriber").unwrap();
        hub.register_webhook(uuid(PUB_HOOK), uuid(PUBLISHER), "https://publisher/webhook")
            .unwrap();
        hub.register_webhook(uuid(SUB_HOOK), uuid(SUBSCRIBER), "https://subscriber/webhook")
            .unwrap();
        hub
    }

    fn document(ns: &[u128]) -> CdfDocument {
        ns.iter()
            .map(|&n| CdfObject::new(uuid(n), CdfType::ContentEntity, uuid(PUBLISHER)))
            .collect()
    }

    fn subscribe(hub: &ContentHub, n: u128) {
        let entry = InterestEntry::new(
            uuid(SUB_HOOK),
            uuid(n),
            SiteRole::Subscriber,
            InterestReason::ImportSuccessful,
            TrackingStatus::Imported,
        );
        hub.add_interests(&uuid(SUB_HOOK), &[entry]).unwrap();
    }

    #[test]
    fn publish_confirms_origin_and_notifies_interested() {
        let hub = hub(HubConfig::default());
        subscribe(&hub, 101);

        assert_eq!(hub.publish(uuid(PUBLISHER), &document(&[100, 101])).unwrap(), 2);
        let pending = hub.pending_deliveries();
        assert_eq!(pending.len(), 2);

        let confirmation = pending.iter().find(|d| d.url == "https://publisher/webhook").unwrap();
        assert_eq!(confirmation.payload.asset_uuids(), vec![uuid(100), uuid(101)]);
        let update = pending.iter().find(|d| d.url == "https://subscriber/webhook").unwrap();
        assert_eq!(update.payload.asset_uuids(), vec![uuid(101)]);
        assert_eq!(update.payload.initiator, uuid(PUBLISHER));
    }

    #[test]
    fn broadcast_notifies_everyone() {
        let hub = hub(HubConfig::default().with_broadcast_updates(true).with_confirmations(false));
        hub.publish(uuid(PUBLISHER), &document(&[100])).unwrap();
        let pending = hub.pending_deliveries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "https://subscriber/webhook");
    }

    #[test]
    fn unknown_publisher_is_rejected() {
        let hub = hub(HubConfig::default());
        let err = hub.publish(uuid(99), &document(&[100])).unwrap_err();
        assert!(matches!(err, HubError::UnknownClient(_)));
        assert!(hub.is_empty());
    }

    #[test]
    fn fetch_returns_present_objects_in_order() {
        let hub = hub(HubConfig::default().with_max_fetch_batch(3));
        hub.publish(uuid(PUBLISHER), &document(&[100, 101])).unwrap();

        let fetched = hub.fetch(&[uuid(101), uuid(999), uuid(100)]).unwrap();
        assert_eq!(fetched.uuids(), vec![uuid(101), uuid(100)]);
        assert!(matches!(
            hub.fetch(&[uuid(1), uuid(2), uuid(3), uuid(4)]),
            Err(HubError::BatchTooLarge { size: 4, limit: 3 })
        ));
    }

    #[test]
    fn delete_only_by_origin() {
        let hub = hub(HubConfig::default());
        hub.publish(uuid(PUBLISHER), &document(&[100])).unwrap();
        subscribe(&hub, 100);
        hub.set_transport(Arc::new(RecordingHttpClient::new()));
        assert_eq!(hub.deliver_pending().delivered, 1);

        assert_eq!(hub.delete(uuid(SUBSCRIBER), &[uuid(100)]).unwrap(), 0);
        assert_eq!(hub.delete(uuid(PUBLISHER), &[uuid(100)]).unwrap(), 1);
        assert!(hub.object(&uuid(100)).is_none());
        let pending = hub.pending_deliveries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.crud, Crud::Delete);
    }

    #[test]
    fn interests_are_idempotent_and_scoped() {
        let hub = hub(HubConfig::default());
        subscribe(&hub, 100);
        subscribe(&hub, 100);
        assert_eq!(hub.list_interests(&uuid(SUB_HOOK), SiteRole::Subscriber).unwrap().len(), 1);
        assert!(hub.list_interests(&uuid(SUB_HOOK), SiteRole::Publisher).unwrap().is_empty());
        assert_eq!(
            hub.remove_interests(&uuid(SUB_HOOK), SiteRole::Subscriber, &[uuid(100)])
                .unwrap(),
            1
        );
        assert!(matches!(
            hub.list_interests(&uuid(77), SiteRole::Subscriber),
            Err(HubError::UnknownWebhook(_))
        ));
    }

    #[test]
    fn delivery_counts_failures() {
        let hub = hub(HubConfig::default());
        subscribe(&hub, 100);
        hub.publish(uuid(PUBLISHER), &document(&[100])).unwrap();

        let http = Arc::new(RecordingHttpClient::new());
        http.set_response(Ok(HttpResponse {
            status: 503,
            body: b"busy".to_vec(),
        }));
        hub.set_transport(http.clone());

        let report = hub.deliver_pending();
        assert_eq!(report, DeliveryReport { delivered: 0, failed: 2 });
        assert_eq!(http.requests().len(), 2);
        assert!(hub.pending_deliveries().is_empty());
    }

    #[test]
    fn unavailable_hub_refuses_requests() {
        let hub = hub(HubConfig::default());
        hub.set_available(false);
        assert!(matches!(hub.fetch(&[uuid(1)]), Err(HubError::Unavailable)));
        hub.set_available(true);
        assert!(hub.fetch(&[uuid(1)]).unwrap().is_empty());
    }
}
