// Publication orchestration: turns one publish-requested event into a set
// of publication records, one per destination account, each driven through
// the Scheduled -> Processing -> Published | Failed state machine.

pub mod store;

pub use store::{ListStore, PublicationStore};

use crate::credentials::CredentialResolver;
use crate::errors::{OrchestratorError, PublishError};
use crate::lock::ListLock;
use crate::models::{
    AutoList, ContentItem, DestinationAccount, PublicationRecord, PublicationResult,
    PublicationStatus, PublishRequested, StatusChanged,
};
use crate::publisher::PublisherRegistry;
use crate::queue::StatusPublisher;
use crate::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// TTL of the per-list publish lock; held across the whole invocation.
    pub lock_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(120),
        }
    }
}

pub struct PublicationOrchestrator {
    config: OrchestratorConfig,
    lists: Arc<dyn ListStore>,
    publications: Arc<dyn PublicationStore>,
    lock: Arc<dyn ListLock>,
    credentials: Arc<dyn CredentialResolver>,
    registry: Arc<PublisherRegistry>,
    status: Arc<dyn StatusPublisher>,
}

impl PublicationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        lists: Arc<dyn ListStore>,
        publications: Arc<dyn PublicationStore>,
        lock: Arc<dyn ListLock>,
        credentials: Arc<dyn CredentialResolver>,
        registry: Arc<PublisherRegistry>,
        status: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            config,
            lists,
            publications,
            lock,
            credentials,
            registry,
            status,
        }
    }

    /// Handle one publish-requested event. Duplicate triggers, missing or
    /// disabled lists, and empty queues are designed no-ops: the event is
    /// consumed without producing records. An error return means a storage
    /// failure and asks the bus to redeliver.
    #[instrument(skip(self, event), fields(list_id = %event.list_id))]
    pub async fn on_publish_requested(
        &self,
        event: &PublishRequested,
    ) -> Result<(), OrchestratorError> {
        let _guard = match self
            .lock
            .try_acquire(event.list_id, self.config.lock_ttl)
            .await?
        {
            Some(guard) => guard,
            None => {
                info!("List lock held elsewhere, absorbing duplicate trigger");
                return Ok(());
            }
        };

        // Second idempotency layer: a backlog replay can arrive after the
        // original trigger's lock expired while its records still process.
        if self.publications.has_processing(event.list_id).await? {
            info!("List already has a Processing record, absorbing duplicate trigger");
            return Ok(());
        }

        let list = match self.lists.get_list(event.list_id).await? {
            Some(list) => list,
            None => {
                warn!("Auto-list not found, dropping publish request");
                return Ok(());
            }
        };

        if !list.enabled {
            info!("Auto-list disabled, dropping publish request");
            return Ok(());
        }

        let item = match self.lists.pop_next_content_item(list.id).await? {
            Some(item) => item,
            None => {
                info!("Content queue empty, nothing to publish");
                return Ok(());
            }
        };

        let accounts = self.lists.destination_accounts(list.id).await?;
        if accounts.is_empty() {
            info!("No destination accounts attached, nothing to publish");
            return Ok(());
        }

        info!(
            item_id = %item.id,
            account_count = accounts.len(),
            "Publishing content item to destinations"
        );

        // One record per destination, driven concurrently; failures are
        // isolated per account and never roll back siblings.
        let publishes = accounts
            .iter()
            .map(|account| self.publish_one(&list, &item, account));
        futures::future::join_all(publishes).await;

        Ok(())
    }

    /// Drive one destination account through the full record lifecycle.
    /// Only this task mutates the record, so transitions stay ordered.
    #[instrument(skip(self, list, item, account), fields(
        account_id = %account.id,
        platform = %account.platform
    ))]
    async fn publish_one(&self, list: &AutoList, item: &ContentItem, account: &DestinationAccount) {
        let record = PublicationRecord::new(item.id, account.id, list.id, list.user_id);

        if let Err(e) = self.publications.create(&record).await {
            error!(error = %e, "Failed to create publication record, skipping destination");
            return;
        }
        self.emit_status(&record, PublicationStatus::Scheduled, None, None)
            .await;

        match self
            .publications
            .transition(
                record.id,
                PublicationStatus::Scheduled,
                PublicationStatus::Processing,
                None,
                None,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(record_id = %record.id, "Record no longer Scheduled, skipping");
                return;
            }
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Failed to transition record");
                return;
            }
        }
        self.emit_status(&record, PublicationStatus::Processing, None, None)
            .await;
        telemetry::publications_in_flight_add(1.0);

        let started = std::time::Instant::now();
        let result = self.invoke_publisher(item, account).await;
        telemetry::record_publish_duration(account.platform, started.elapsed().as_secs_f64());
        telemetry::publications_in_flight_add(-1.0);

        match result.status {
            PublicationStatus::Published => {
                telemetry::record_publication_published(account.platform);
            }
            _ => {
                telemetry::record_publication_failed(
                    account.platform,
                    result.failure_kind.unwrap_or("unknown"),
                );
            }
        }

        match self
            .publications
            .transition(
                record.id,
                PublicationStatus::Processing,
                result.status,
                result.public_url.clone(),
                result.error_message.clone(),
            )
            .await
        {
            Ok(true) => {
                info!(
                    record_id = %record.id,
                    status = %result.status,
                    "Publication record finalized"
                );
                self.emit_status(
                    &record,
                    result.status,
                    result.public_url,
                    result.error_message,
                )
                .await;
            }
            Ok(false) => {
                warn!(record_id = %record.id, "Record left Processing concurrently, not finalized");
            }
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Failed to finalize publication record");
            }
        }
    }

    /// Resolve the credential, look up the platform publisher, and run the
    /// publish call, folding every failure into a Failed result with a
    /// human-readable message.
    async fn invoke_publisher(
        &self,
        item: &ContentItem,
        account: &DestinationAccount,
    ) -> PublicationResult {
        let credential = match self.credentials.resolve(account).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Credential resolution failed");
                return PublicationResult::failed(
                    "credential",
                    format!("Credential unavailable: {}", e),
                );
            }
        };

        let publisher = match self.registry.get(account.platform) {
            Ok(publisher) => publisher,
            Err(e) => {
                warn!(platform = %account.platform, error = %e, "No publisher available");
                return PublicationResult::failed(e.kind(), e.to_string());
            }
        };

        match publisher.publish(&credential, item).await {
            Ok(outcome) => PublicationResult::published(outcome.public_url),
            Err(e @ PublishError::CircuitOpen(_)) => {
                warn!(platform = %account.platform, "Publish rejected by open circuit breaker");
                PublicationResult::failed(e.kind(), e.to_string())
            }
            Err(e) => {
                warn!(platform = %account.platform, error = %e, kind = e.kind(), "Publish failed");
                PublicationResult::failed(e.kind(), e.to_string())
            }
        }
    }

    /// Status events are best effort; a failed emit never affects the record.
    async fn emit_status(
        &self,
        record: &PublicationRecord,
        status: PublicationStatus,
        public_url: Option<String>,
        error_message: Option<String>,
    ) {
        let event = StatusChanged {
            publication_record_id: record.id,
            user_id: record.user_id,
            status,
            public_url,
            error_message,
        };

        if let Err(e) = self.status.publish_status(&event).await {
            debug!(record_id = %record.id, error = %e, "Failed to emit status event");
        }
    }
}
