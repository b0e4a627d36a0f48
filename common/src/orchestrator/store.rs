// Persistence seams used by the orchestrator and trigger engine. Concrete
// implementations live in db::repositories; tests substitute mocks.

use crate::errors::DatabaseError;
use crate::models::{
    AutoList, ContentItem, DestinationAccount, PublicationRecord, PublicationStatus, ScheduleSpec,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Read side of auto-lists: schedule specs, list metadata, the content
/// queue cursor, and destination bindings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListStore: Send + Sync {
    /// All schedule specs whose owning list is enabled.
    async fn find_enabled_specs(&self) -> Result<Vec<ScheduleSpec>, DatabaseError>;

    async fn get_list(&self, list_id: Uuid) -> Result<Option<AutoList>, DatabaseError>;

    /// Return the content item at the queue cursor and advance the cursor,
    /// wrapping past the end. None when the queue is empty. Atomic: two
    /// concurrent pops never return the same cursor position.
    async fn pop_next_content_item(
        &self,
        list_id: Uuid,
    ) -> Result<Option<ContentItem>, DatabaseError>;

    async fn destination_accounts(
        &self,
        list_id: Uuid,
    ) -> Result<Vec<DestinationAccount>, DatabaseError>;
}

/// Publication record persistence with guarded status transitions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublicationStore: Send + Sync {
    async fn create(&self, record: &PublicationRecord) -> Result<(), DatabaseError>;

    async fn get(&self, record_id: Uuid) -> Result<Option<PublicationRecord>, DatabaseError>;

    /// Conditional transition: applies only when the stored status equals
    /// `from`. Returns false when the guard failed, which means a concurrent
    /// writer got there first; terminal states are immutable through this
    /// path by construction.
    async fn transition(
        &self,
        record_id: Uuid,
        from: PublicationStatus,
        to: PublicationStatus,
        public_url: Option<String>,
        error_message: Option<String>,
    ) -> Result<bool, DatabaseError>;

    /// True when the list has any record still in Processing.
    async fn has_processing(&self, list_id: Uuid) -> Result<bool, DatabaseError>;
}
