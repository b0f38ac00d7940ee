//! Error types for the sync engine.

use syndic_cdf::CdfError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// CDF model error.
    #[error("cdf error: {0}")]
    Cdf(#[from] CdfError),

    /// I/O error from a persistent store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error from a persistent store.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document handed to the ingestion engine has no entities.
    #[error("invalid document: no entities")]
    InvalidDocument,

    /// A capability required by the document cannot be satisfied by the host.
    #[error("missing capability: {capability}")]
    MissingCapability {
        /// The capability name.
        capability: String,
    },

    /// The dependency closure could not be completed.
    #[error("dependency closure incomplete, missing {missing:?}")]
    ImportValidation {
        /// UUIDs that are still missing.
        missing: Vec<Uuid>,
    },

    /// Closure assembly hit its round limit with dependencies still unfetched.
    #[error("dependency closure not assembled within {rounds} round(s), pending {pending:?}")]
    ClosureRoundLimit {
        /// Fetch rounds performed.
        rounds: usize,
        /// Dependencies that were never requested.
        pending: Vec<Uuid>,
    },

    /// An ingestion pass made no progress and no recovery was supplied.
    #[error("ingestion made no progress after {iterations} iteration(s), unresolved {unresolved:?}")]
    NoProgress {
        /// UUIDs that could not be materialized.
        unresolved: Vec<Uuid>,
        /// Loop iterations performed.
        iterations: usize,
    },

    /// A tracked entity could not be loaded from the host.
    #[error("entity not found: {entity_type} {uuid}")]
    EntityNotFound {
        /// Entity type.
        entity_type: String,
        /// Entity UUID.
        uuid: Uuid,
    },

    /// The host rejected an operation.
    #[error("host error: {0}")]
    Host(String),

    /// Invalid tracker state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The client is not connected to a hub.
    #[error("not connected to a hub")]
    NotConnected,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a host error.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Returns true if a queue worker should release the item for another attempt.
    ///
    /// Closure and capability failures are retryable because the republish
    /// request or an operator can make the next attempt succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout
            | SyncError::NotConnected
            | SyncError::ImportValidation { .. }
            | SyncError::NoProgress { .. }
            | SyncError::MissingCapability { .. }
            | SyncError::Host(_)
            | SyncError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ImportValidation { missing: vec![] }.is_retryable());
        assert!(SyncError::MissingCapability {
            capability: "taxonomy".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidDocument.is_retryable());
        assert!(!SyncError::ClosureRoundLimit {
            rounds: 20,
            pending: vec![]
        }
        .is_retryable());
        assert!(!SyncError::Protocol("bad".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::MissingCapability {
            capability: "paragraphs".into(),
        };
        assert_eq!(err.to_string(), "missing capability: paragraphs");

        let missing = Uuid::from_u128(7);
        let err = SyncError::ImportValidation {
            missing: vec![missing],
        };
        assert!(err.to_string().contains(&missing.to_string()));

        let err = SyncError::NoProgress {
            unresolved: vec![],
            iterations: 3,
        };
        assert!(err.to_string().contains('3'));
    }
}
