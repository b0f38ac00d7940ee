//! Error types for the hub.

use syndic_cdf::CdfError;
use syndic_engine::SyncError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Errors that can occur in the hub.
#[derive(Error, Debug)]
pub enum HubError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client is not registered.
    #[error("unknown client: {0}")]
    UnknownClient(Uuid),

    /// The webhook is not registered.
    #[error("unknown webhook: {0}")]
    UnknownWebhook(Uuid),

    /// The request exceeds a configured limit.
    #[error("batch of {size} exceeds limit {limit}")]
    BatchTooLarge {
        /// Requested size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The hub is not accepting requests.
    #[error("hub unavailable")]
    Unavailable,

    /// Payload encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] CdfError),
}

impl HubError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HubError::InvalidRequest(_)
                | HubError::UnknownClient(_)
                | HubError::UnknownWebhook(_)
                | HubError::BatchTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, HubError::Unavailable | HubError::Codec(_))
    }
}

impl From<HubError> for SyncError {
    fn from(error: HubError) -> Self {
        if error.is_client_error() {
            SyncError::Protocol(error.to_string())
        } else {
            SyncError::transport_retryable(error.to_string())
        }
    }
}
