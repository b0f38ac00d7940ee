//! Interest list entries.

use crate::status::TrackingStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of syndication an interest entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteRole {
    /// The repository publishes the entity.
    Publisher,
    /// The repository subscribes to the entity.
    Subscriber,
}

impl SiteRole {
    /// Statuses that count as "synchronized" for this role.
    pub fn synchronized_statuses(&self) -> &'static [TrackingStatus] {
        match self {
            SiteRole::Publisher => &[TrackingStatus::Exported, TrackingStatus::Confirmed],
            SiteRole::Subscriber => &[TrackingStatus::Imported, TrackingStatus::AutoUpdateDisabled],
        }
    }
}

/// Why an entity was added to an interest list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterestReason {
    /// The entity was exported by this repository.
    ExportSuccessful,
    /// The entity was imported by this repository.
    ImportSuccessful,
    /// An operator added the entity.
    Manual,
}

/// "This subscription wants updates about this UUID."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestEntry {
    /// Webhook identity of the subscription.
    pub webhook: Uuid,
    /// Entity UUID.
    pub uuid: Uuid,
    /// Role under which the interest is declared.
    pub site_role: SiteRole,
    /// Why the entry exists.
    pub reason: InterestReason,
    /// Last known syndication status of the entity.
    pub syndication_status: TrackingStatus,
}

impl InterestEntry {
    /// Creates an interest entry.
    pub fn new(
        webhook: Uuid,
        uuid: Uuid,
        site_role: SiteRole,
        reason: InterestReason,
        syndication_status: TrackingStatus,
    ) -> Self {
        Self {
            webhook,
            uuid,
            site_role,
            reason,
            syndication_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reason_wire_names() {
        assert_eq!(
            serde_json::to_value(InterestReason::ExportSuccessful).unwrap(),
            json!("export-successful")
        );
        assert_eq!(
            serde_json::to_value(InterestReason::ImportSuccessful).unwrap(),
            json!("import-successful")
        );
        assert_eq!(serde_json::to_value(InterestReason::Manual).unwrap(), json!("manual"));
    }

    #[test]
    fn synchronized_statuses_per_role() {
        assert!(SiteRole::Publisher
            .synchronized_statuses()
            .contains(&TrackingStatus::Confirmed));
        assert!(!SiteRole::Publisher
            .synchronized_statuses()
            .contains(&TrackingStatus::Queued));
        assert!(SiteRole::Subscriber
            .synchronized_statuses()
            .contains(&TrackingStatus::AutoUpdateDisabled));
    }
}
