//! Hub configuration.

use uuid::Uuid;

/// Configuration for the content hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Identity of the hub itself.
    pub hub_uuid: Uuid,
    /// Maximum UUIDs answered per fetch request.
    pub max_fetch_batch: usize,
    /// Notify every other webhook of updates, not only interested ones.
    pub broadcast_updates: bool,
    /// Send the origin a confirmation after each publish.
    pub confirm_publishes: bool,
}

impl HubConfig {
    /// Creates a new hub configuration.
    pub fn new(hub_uuid: Uuid) -> Self {
        Self {
            hub_uuid,
            max_fetch_batch: 500,
            broadcast_updates: false,
            confirm_publishes: true,
        }
    }

    /// Sets the maximum fetch batch size.
    pub fn with_max_fetch_batch(mut self, size: usize) -> Self {
        self.max_fetch_batch = size;
        self
    }

    /// Notifies all webhooks of every update.
    pub fn with_broadcast_updates(mut self, broadcast: bool) -> Self {
        self.broadcast_updates = broadcast;
        self
    }

    /// Enables or disables publish confirmations.
    pub fn with_confirmations(mut self, confirm: bool) -> Self {
        self.confirm_publishes = confirm;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new(Uuid::nil())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = HubConfig::default();
        assert_eq!(config.max_fetch_batch, 500);
        assert!(!config.broadcast_updates);
        assert!(config.confirm_publishes);
    }

    #[test]
    fn config_builder() {
        let config = HubConfig::new(Uuid::from_u128(1))
            .with_max_fetch_batch(10)
            .with_broadcast_updates(true)
            .with_confirmations(false);

        assert_eq!(config.hub_uuid, Uuid::from_u128(1));
        assert_eq!(config.max_fetch_batch, 10);
        assert!(config.broadcast_updates);
        assert!(!config.confirm_publishes);
    }
}
