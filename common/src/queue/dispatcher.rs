// Publishers onto the bus: publish requests into the JetStream work queue
// (with server-side deduplication) and status events onto core NATS.

use crate::errors::QueueError;
use crate::models::{PublishRequested, StatusChanged};
use crate::queue::nats::{status_subject, NatsClient, REQUEST_SUBJECT};
use async_nats::jetstream::context::PublishAckFuture;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Dispatches fired triggers to the work queue.
#[async_trait::async_trait]
pub trait TriggerDispatcher: Send + Sync {
    /// Publish a publish-request with the given deduplication key. Requests
    /// carrying a key the stream has already seen are dropped server-side.
    async fn dispatch(&self, event: &PublishRequested, dedup_key: &str) -> Result<(), QueueError>;
}

/// Emits status change events for subscriber fan-out.
#[async_trait::async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish_status(&self, event: &StatusChanged) -> Result<(), QueueError>;
}

pub struct NatsTriggerDispatcher {
    client: NatsClient,
    publish_timeout: Duration,
    max_retries: u32,
}

impl NatsTriggerDispatcher {
    pub fn new(client: NatsClient) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    async fn publish_once(
        &self,
        event: &PublishRequested,
        dedup_key: &str,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize publish request: {}", e))
        })?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", dedup_key);
        headers.insert("List-Id", event.list_id.to_string().as_str());

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish_with_headers(REQUEST_SUBJECT, headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        match tokio::time::timeout(self.publish_timeout, publish_future).await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}

#[async_trait::async_trait]
impl TriggerDispatcher for NatsTriggerDispatcher {
    #[instrument(skip(self, event), fields(list_id = %event.list_id, dedup_key = %dedup_key))]
    async fn dispatch(&self, event: &PublishRequested, dedup_key: &str) -> Result<(), QueueError> {
        let mut attempt = 0;
        let mut last_error = None;

        // Retrying with the same dedup key is safe: redundant publishes
        // collapse server-side.
        while attempt <= self.max_retries {
            match self.publish_once(event, dedup_key).await {
                Ok(()) => {
                    info!("Publish request dispatched to work queue");
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    last_error = Some(e);

                    if attempt <= self.max_retries {
                        let delay = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
                        warn!(
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            "Dispatch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            QueueError::PublishFailed("Unknown error during dispatch".to_string())
        }))
    }
}

/// Core-NATS status publisher. Status events are notifications, not work:
/// no stream, no redelivery, subscribers that are away simply miss them.
pub struct NatsStatusPublisher {
    client: async_nats::Client,
}

impl NatsStatusPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StatusPublisher for NatsStatusPublisher {
    #[instrument(skip(self, event), fields(
        publication_record_id = %event.publication_record_id,
        user_id = %event.user_id,
        status = %event.status
    ))]
    async fn publish_status(&self, event: &StatusChanged) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(event).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize status event: {}", e))
        })?;

        self.client
            .publish(status_subject(event.user_id), payload.into())
            .await
            .map_err(|e| {
                QueueError::PublishFailed(format!("Failed to publish status event: {}", e))
            })?;

        info!("Status event published");
        Ok(())
    }
}
