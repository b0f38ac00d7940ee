//! Syndication status of a tracked entity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a tracked entity on either side of syndication.
///
/// Publisher side: `Queued → Exported → Confirmed`.
/// Subscriber side: `Queued → Imported`, plus `AutoUpdateDisabled` for entities
/// that exist locally but must not be overwritten by incoming updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    /// Waiting in a work queue.
    Queued,
    /// Sent to the hub, not yet confirmed.
    Exported,
    /// The hub acknowledged the export.
    Confirmed,
    /// Materialized locally from a remote document.
    Imported,
    /// Present locally; incoming updates are ignored.
    AutoUpdateDisabled,
}

impl TrackingStatus {
    /// Returns the wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Queued => "queued",
            TrackingStatus::Exported => "exported",
            TrackingStatus::Confirmed => "confirmed",
            TrackingStatus::Imported => "imported",
            TrackingStatus::AutoUpdateDisabled => "auto_update_disabled",
        }
    }

    /// Parses a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "queued" => Some(TrackingStatus::Queued),
            "exported" => Some(TrackingStatus::Exported),
            "confirmed" => Some(TrackingStatus::Confirmed),
            "imported" => Some(TrackingStatus::Imported),
            "auto_update_disabled" => Some(TrackingStatus::AutoUpdateDisabled),
            _ => None,
        }
    }

    /// Returns true if this status belongs to the publisher state machine.
    pub fn is_publisher_status(&self) -> bool {
        matches!(
            self,
            TrackingStatus::Queued | TrackingStatus::Exported | TrackingStatus::Confirmed
        )
    }

    /// Returns true if this status belongs to the subscriber state machine.
    pub fn is_subscriber_status(&self) -> bool {
        matches!(
            self,
            TrackingStatus::Queued | TrackingStatus::Imported | TrackingStatus::AutoUpdateDisabled
        )
    }

    /// Returns true if the entity has reached the remote side at least once.
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, TrackingStatus::Queued)
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
