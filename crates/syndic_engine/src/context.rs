//! Save context handed to entity hosts.

use uuid::Uuid;

/// Describes why a host is asked to save or delete an entity.
///
/// Hosts must not enqueue an export for a save made while syndicating,
/// otherwise imported content would echo back to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportContext {
    syndicating: bool,
    origin: Option<Uuid>,
}

impl ImportContext {
    /// Context for a save made by the ingestion engine.
    pub fn syndication(origin: Uuid) -> Self {
        Self {
            syndicating: true,
            origin: Some(origin),
        }
    }

    /// Context for an ordinary local edit.
    pub fn local_edit() -> Self {
        Self {
            syndicating: false,
            origin: None,
        }
    }

    /// Returns true if the save is part of an import.
    pub fn is_syndicating(&self) -> bool {
        self.syndicating
    }

    /// Repository the imported content came from.
    pub fn origin(&self) -> Option<Uuid> {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts() {
        let origin = Uuid::from_u128(9);
        assert!(ImportContext::syndication(origin).is_syndicating());
        assert_eq!(ImportContext::syndication(origin).origin(), Some(origin));
        assert!(!ImportContext::local_edit().is_syndicating());
    }
}
