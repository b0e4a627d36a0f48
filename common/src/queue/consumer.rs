// Publish-request consumer for the JetStream work queue. Each request is
// handled in its own task so one slow platform call does not delay other
// lists; per-list ordering is enforced downstream by the publish lock.

use crate::errors::QueueError;
use crate::models::PublishRequested;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::Message;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, instrument, warn};

#[async_trait::async_trait]
pub trait PublishConsumer: Send + Sync {
    /// Consume publish requests until shutdown is requested.
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown.
    fn shutdown(&self);
}

/// Handler invoked for each publish request. A returned error NAKs the
/// message for redelivery; Ok acknowledges it.
pub type PublishHandler = Arc<
    dyn Fn(PublishRequested) -> futures::future::BoxFuture<'static, Result<(), anyhow::Error>>
        + Send
        + Sync,
>;

pub struct NatsPublishConsumer {
    consumer: PullConsumer,
    handler: PublishHandler,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

const DEFAULT_MAX_IN_FLIGHT: usize = 16;

impl NatsPublishConsumer {
    #[instrument(skip(client, handler))]
    pub async fn new(client: &NatsClient, handler: PublishHandler) -> Result<Self, QueueError> {
        info!("Creating publish-request consumer");

        let consumer = client.get_or_create_consumer().await?;

        Ok(Self {
            consumer,
            handler,
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max_in_flight));
        self.max_in_flight = max_in_flight;
        self
    }

    /// Hand a message off to its own task. Ack and NAK happen inside the
    /// task once the handler resolves.
    async fn spawn_handler(&self, message: Message) {
        let permit = match self.in_flight.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed, shutting down
        };
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            let _permit = permit;

            let event: PublishRequested = match serde_json::from_slice(&message.payload) {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "Malformed publish request, dropping");
                    // A payload that cannot parse will never parse; ack so
                    // it is not redelivered forever.
                    if let Err(e) = message.ack().await {
                        error!(error = %e, "Failed to acknowledge malformed message");
                    }
                    return;
                }
            };

            info!(list_id = %event.list_id, "Processing publish request");

            match handler(event.clone()).await {
                Ok(()) => {
                    if let Err(e) = message.ack().await {
                        error!(
                            list_id = %event.list_id,
                            error = %e,
                            "Failed to acknowledge message"
                        );
                    }
                }
                Err(e) => {
                    error!(list_id = %event.list_id, error = %e, "Publish request failed");

                    if let Err(e) = message
                        .ack_with(async_nats::jetstream::AckKind::Nak(None))
                        .await
                    {
                        error!(error = %e, "Failed to negative acknowledge message");
                    } else {
                        warn!(list_id = %event.list_id, "Message NAKed for redelivery");
                    }
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl PublishConsumer for NatsPublishConsumer {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), QueueError> {
        info!("Starting publish-request consumer");

        let mut messages = self.consumer.messages().await.map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to create message stream: {}", e))
        })?;

        info!("Consumer started, waiting for publish requests");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping consumer");
                break;
            }

            tokio::select! {
                message_result = messages.next() => {
                    match message_result {
                        Some(Ok(message)) => {
                            self.spawn_handler(message).await;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
            }
        }

        // Drain: once all permits are reclaimable, every handler has finished.
        let _ = self.in_flight.acquire_many(self.max_in_flight as u32).await;

        info!("Consumer stopped gracefully");
        Ok(())
    }

    fn shutdown(&self) {
        info!("Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }
}
