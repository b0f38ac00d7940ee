//! Routing of validated inbound webhook notifications.

use crate::context::ImportContext;
use crate::enqueue::{EnqueueOperation, EnqueueOutcome, EntityEnqueuer};
use crate::error::{SyncError, SyncResult};
use crate::host::EntityHost;
use crate::http::{HttpResponse, LoopbackServer};
use crate::queue::WorkQueue;
use crate::tracker::SubscriberTracker;
use std::fmt;
use std::sync::Arc;
use syndic_cdf::{Crud, ImportQueueItem, RepublishRequest, WebhookPayload};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a notification caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Publisher records were confirmed.
    Confirmed {
        /// Records confirmed.
        count: usize,
    },
    /// An import work item was pushed.
    ImportQueued {
        /// Id of the work item.
        queue_id: String,
        /// UUIDs in the item.
        uuids: Vec<Uuid>,
    },
    /// Local copies were deleted.
    Deleted {
        /// Entities deleted.
        count: usize,
    },
    /// A republish request re-enqueued an export.
    Requeued {
        /// Result of the enqueue.
        outcome: EnqueueOutcome,
    },
    /// Nothing to do.
    Ignored {
        /// Why.
        reason: String,
    },
}

impl DispatchOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        DispatchOutcome::Ignored {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Confirmed { count } => write!(f, "confirmed {} entities", count),
            DispatchOutcome::ImportQueued { queue_id, uuids } => {
                write!(f, "queued {} entities for import as {}", uuids.len(), queue_id)
            }
            DispatchOutcome::Deleted { count } => write!(f, "deleted {} entities", count),
            DispatchOutcome::Requeued { outcome } => match outcome {
                EnqueueOutcome::Queued { queue_id } => write!(f, "re-enqueued as {}", queue_id),
                EnqueueOutcome::Ineligible { reason } => write!(f, "not re-enqueued: {}", reason),
            },
            DispatchOutcome::Ignored { reason } => write!(f, "ignored: {}", reason),
        }
    }
}

struct SubscriberSide {
    tracker: SubscriberTracker,
    queue: Arc<dyn WorkQueue<ImportQueueItem>>,
}

/// Routes inbound notifications to the publisher and subscriber sides of a
/// repository.
pub struct WebhookDispatcher {
    client_uuid: Uuid,
    host: Arc<dyn EntityHost>,
    enqueuer: Option<Arc<EntityEnqueuer>>,
    subscriber: Option<SubscriberSide>,
}

impl WebhookDispatcher {
    /// Creates a dispatcher for the repository `client_uuid`.
    pub fn new(client_uuid: Uuid, host: Arc<dyn EntityHost>) -> Self {
        Self {
            client_uuid,
            host,
            enqueuer: None,
            subscriber: None,
        }
    }

    /// Enables confirmations and republish handling.
    pub fn with_publisher(mut self, enqueuer: Arc<EntityEnqueuer>) -> Self {
        self.enqueuer = Some(enqueuer);
        self
    }

    /// Enables update and delete handling for imported entities.
    pub fn with_subscriber(
        mut self,
        tracker: SubscriberTracker,
        queue: Arc<dyn WorkQueue<ImportQueueItem>>,
    ) -> Self {
        self.subscriber = Some(SubscriberSide { tracker, queue });
        self
    }

    /// Handles a raw notification body.
    pub fn dispatch_raw(&self, body: &[u8]) -> SyncResult<DispatchOutcome> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        match value.get("crud").and_then(serde_json::Value::as_str) {
            Some("republish") => self.dispatch_republish(&RepublishRequest::decode(body)?),
            Some(_) => self.dispatch(&WebhookPayload::decode(body)?),
            None => Err(SyncError::Protocol("notification has no crud".into())),
        }
    }

    /// Handles an entity notification.
    pub fn dispatch(&self, payload: &WebhookPayload) -> SyncResult<DispatchOutcome> {
        if !payload.is_successful() {
            return Ok(DispatchOutcome::ignored(format!("status {}", payload.status)));
        }
        if payload.assets.is_empty() {
            return Ok(DispatchOutcome::ignored("no assets"));
        }
        match payload.crud {
            Crud::Update if payload.initiator == self.client_uuid => self.confirm(payload),
            Crud::Update => self.queue_import(payload),
            Crud::Delete if payload.initiator == self.client_uuid => {
                Ok(DispatchOutcome::ignored("own deletion"))
            }
            Crud::Delete => self.delete_local(payload),
            other => Ok(DispatchOutcome::ignored(format!("unsupported crud {:?}", other))),
        }
    }

    /// Handles a republish request for an entity this repository published.
    ///
    /// The entity's hash is nullified so the next export sends its whole
    /// dependency closure, then it is enqueued again.
    pub fn dispatch_republish(&self, request: &RepublishRequest) -> SyncResult<DispatchOutcome> {
        let Some(enqueuer) = &self.enqueuer else {
            return Ok(DispatchOutcome::ignored("not a publisher"));
        };
        let tracker = enqueuer.tracker();
        let Some(record) = tracker.get(&request.uuid)? else {
            debug!(uuid = %request.uuid, "Republish request for an entity never exported");
            return Ok(DispatchOutcome::ignored("entity is not tracked"));
        };
        let Some(entity) = self.host.load(&record.entity_type, &request.uuid)? else {
            warn!(uuid = %request.uuid, "Republish requested for a missing entity, tracking row deleted");
            tracker.delete(&request.uuid)?;
            return Ok(DispatchOutcome::ignored("entity no longer exists"));
        };

        tracker.nullify_hash(&request.uuid)?;
        let outcome = enqueuer.enqueue(&entity, EnqueueOperation::Update)?;
        info!(
            uuid = %request.uuid,
            initiator = %request.initiator,
            queued = outcome.is_queued(),
            "Republish request handled"
        );
        Ok(DispatchOutcome::Requeued { outcome })
    }

    fn confirm(&self, payload: &WebhookPayload) -> SyncResult<DispatchOutcome> {
        let Some(enqueuer) = &self.enqueuer else {
            return Ok(DispatchOutcome::ignored("not a publisher"));
        };
        let mut count = 0;
        for uuid in payload.asset_uuids() {
            if enqueuer.tracker().confirm(&uuid)? {
                count += 1;
            }
        }
        debug!(count, "Export confirmations received");
        Ok(DispatchOutcome::Confirmed { count })
    }

    fn queue_import(&self, payload: &WebhookPayload) -> SyncResult<DispatchOutcome> {
        let Some(side) = &self.subscriber else {
            return Ok(DispatchOutcome::ignored("not a subscriber"));
        };
        let mut wanted = Vec::new();
        for asset in &payload.assets {
            if side.tracker.is_auto_update_disabled(&asset.uuid)? {
                debug!(uuid = %asset.uuid, "Auto-update disabled, update ignored");
                continue;
            }
            wanted.push(asset);
        }
        if wanted.is_empty() {
            return Ok(DispatchOutcome::ignored("auto-update disabled"));
        }

        let uuids: Vec<Uuid> = wanted.iter().map(|asset| asset.uuid).collect();
        let queue_id = side.queue.push(ImportQueueItem::from_uuids(&uuids))?;
        for asset in wanted {
            let entity_type = match side.tracker.get(&asset.uuid)? {
                Some(record) => record.entity_type,
                None => asset.asset_type.as_str().to_string(),
            };
            side.tracker.track_queued(&entity_type, asset.uuid, &queue_id)?;
        }
        info!(count = uuids.len(), queue_id = %queue_id, initiator = %payload.initiator, "Import queued");
        Ok(DispatchOutcome::ImportQueued { queue_id, uuids })
    }

    fn delete_local(&self, payload: &WebhookPayload) -> SyncResult<DispatchOutcome> {
        let Some(side) = &self.subscriber else {
            return Ok(DispatchOutcome::ignored("not a subscriber"));
        };
        let context = ImportContext::syndication(payload.initiator);
        let mut count = 0;
        for uuid in payload.asset_uuids() {
            let Some(record) = side.tracker.get(&uuid)? else {
                continue;
            };
            if side.tracker.is_auto_update_disabled(&uuid)? {
                debug!(uuid = %uuid, "Auto-update disabled, deletion ignored");
                continue;
            }
            if self.host.delete(&record.entity_type, &uuid, &context)? {
                count += 1;
            }
            side.tracker.delete(&uuid)?;
        }
        info!(count, initiator = %payload.initiator, "Syndicated deletion applied");
        Ok(DispatchOutcome::Deleted { count })
    }
}

impl LoopbackServer for WebhookDispatcher {
    fn handle_post(&self, _url: &str, body: &[u8]) -> Result<HttpResponse, String> {
        match self.dispatch_raw(body) {
            Ok(outcome) => Ok(HttpResponse::ok(outcome.to_string())),
            Err(e @ (SyncError::Protocol(_) | SyncError::Json(_) | SyncError::Cdf(_))) => Ok(HttpResponse {
                status: 400,
                body: e.to_string().into_bytes(),
            }),
            Err(e) => Ok(HttpResponse {
                status: 500,
                body: e.to_string().into_bytes(),
            }),
        }
    }
}

impl fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("client_uuid", &self.client_uuid)
            .field("publisher", &self.enqueuer.is_some())
            .field("subscriber", &self.subscriber.is_some())
            .finish()
    }
}
