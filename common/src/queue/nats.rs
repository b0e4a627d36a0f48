// NATS JetStream client for the publish-request work queue.

use crate::config::NatsConfig;
use crate::errors::QueueError;
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Subject carrying publish requests inside the work-queue stream.
pub const REQUEST_SUBJECT: &str = "publications.requests";

/// Per-user subject for status change events, outside JetStream. Fan-out is
/// best effort: a subscriber that is not listening simply misses the event.
pub fn status_subject(user_id: Uuid) -> String {
    format!("publications.status.{}", user_id)
}

/// Wildcard subject matching every user's status events.
pub const STATUS_SUBJECT_WILDCARD: &str = "publications.status.*";

/// Messages older than this are dropped from the stream; a publish request
/// that sat unconsumed for a day is stale, not pending.
const MAX_AGE: Duration = Duration::from_secs(86_400);
const MAX_MESSAGES: i64 = 1_000_000;

/// Delivery attempts before JetStream stops redelivering a request.
const MAX_DELIVER: i64 = 10;

/// Ack deadline. Covers the slowest publication path: resumable upload plus
/// the full processing poll budget.
const ACK_WAIT: Duration = Duration::from_secs(300);

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        info!("Connected to NATS server");

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Create or get the work-queue stream for publish requests. WorkQueue
    /// retention deletes each message once a worker acknowledges it.
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(stream_name = %self.config.stream_name, "Initializing JetStream stream");

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![REQUEST_SUBJECT.to_string()],
            retention: RetentionPolicy::WorkQueue,
            max_age: MAX_AGE,
            max_messages: MAX_MESSAGES,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        info!(stream_name = %self.config.stream_name, "Stream initialized");

        Ok(stream)
    }

    /// Create or get the durable pull consumer shared by worker instances.
    #[instrument(skip(self))]
    pub async fn get_or_create_consumer(&self) -> Result<PullConsumer, QueueError> {
        info!(consumer_name = %self.config.consumer_name, "Creating consumer");

        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::StreamNotFound(format!("Stream not found: {}", e)))?;

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(self.config.consumer_name.clone()),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            max_deliver: MAX_DELIVER,
            ack_wait: ACK_WAIT,
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!("Failed to create consumer: {}", e))
            })?;

        info!(consumer_name = %self.config.consumer_name, "Consumer created");

        Ok(consumer)
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::HealthCheck(format!("Health check failed: {}", e)))?;

        Ok(())
    }
}
