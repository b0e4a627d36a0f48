// Status fan-out: per-user broadcast channels feeding live subscription
// streams. Delivery is fire-and-forget; a user with no open connection
// simply misses the event and reconciles via a pull query elsewhere.

use crate::models::StatusChanged;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Registry of per-user broadcast channels. Every connection a user holds
/// subscribes to the same sender, so one event reaches all of them.
pub struct SubscriberRegistry {
    channel_capacity: usize,
    channels: RwLock<HashMap<Uuid, broadcast::Sender<StatusChanged>>>,
}

impl SubscriberRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a new connection for a user, creating the channel on first
    /// use.
    pub async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<StatusChanged> {
        let mut channels = self.channels.write().await;
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe()
    }

    /// Deliver an event to every open connection of a user. Returns how many
    /// connections received it; zero when the user is not connected. Channels
    /// with no remaining receivers are dropped from the registry.
    pub async fn send_to_user(&self, user_id: Uuid, event: StatusChanged) -> usize {
        let mut channels = self.channels.write().await;

        match channels.get(&user_id) {
            Some(sender) => match sender.send(event) {
                Ok(receivers) => receivers,
                Err(_) => {
                    // All receivers are gone.
                    channels.remove(&user_id);
                    0
                }
            },
            None => 0,
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(&user_id)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}

/// Consumes status-changed events off the bus and routes each to its owning
/// user's connections.
pub struct StatusNotifier {
    registry: Arc<SubscriberRegistry>,
}

impl StatusNotifier {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, event), fields(
        publication_record_id = %event.publication_record_id,
        user_id = %event.user_id,
        status = %event.status
    ))]
    pub async fn on_status_changed(&self, event: StatusChanged) {
        let delivered = self.registry.send_to_user(event.user_id, event).await;
        debug!(connections = delivered, "Status event fanned out");
    }
}
