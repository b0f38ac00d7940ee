//! Best-effort republish requests to an entity's origin.

use crate::error::SyncResult;
use crate::http::HttpClient;
use std::sync::Arc;
use syndic_cdf::{CdfObject, RepublishRequest};
use tracing::{info, warn};
use uuid::Uuid;

/// Looks up where a repository receives webhook notifications.
pub trait WebhookDirectory: Send + Sync {
    /// Returns the webhook URL of a client, if it registered one.
    fn webhook_url(&self, client: &Uuid) -> SyncResult<Option<String>>;
}

/// Sends republish requests. Failures are logged and never retried.
#[derive(Clone)]
pub struct Republisher {
    initiator: Uuid,
    directory: Arc<dyn WebhookDirectory>,
    http: Arc<dyn HttpClient>,
}

impl Republisher {
    /// Creates a republisher acting on behalf of `initiator`.
    pub fn new(initiator: Uuid, directory: Arc<dyn WebhookDirectory>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            initiator,
            directory,
            http,
        }
    }

    /// Asks the object's origin to publish it again.
    ///
    /// Returns true if the origin acknowledged the request.
    pub fn request(&self, object: &CdfObject) -> bool {
        let url = match self.directory.webhook_url(&object.origin) {
            Ok(Some(url)) => url,
            Ok(None) => {
                warn!(uuid = %object.uuid, origin = %object.origin, "Origin has no webhook, republish skipped");
                return false;
            }
            Err(e) => {
                warn!(uuid = %object.uuid, origin = %object.origin, error = %e, "Webhook lookup failed");
                return false;
            }
        };

        let body = match RepublishRequest::for_object(object, self.initiator).encode() {
            Ok(body) => body,
            Err(e) => {
                warn!(uuid = %object.uuid, error = %e, "Failed to encode republish request");
                return false;
            }
        };

        match self.http.post(&url, body) {
            Ok(response) if response.is_success() => {
                info!(uuid = %object.uuid, url = %url, response = %response.text(), "Republish requested");
                true
            }
            Ok(response) => {
                warn!(uuid = %object.uuid, url = %url, status = response.status, "Republish request rejected");
                false
            }
            Err(message) => {
                warn!(uuid = %object.uuid, url = %url, error = %message, "Republish request failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for Republisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Republisher")
            .field("initiator", &self.initiator)
            .finish()
    }
}
