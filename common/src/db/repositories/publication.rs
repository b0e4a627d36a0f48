// Publication record repository. Status transitions go through a guarded
// conditional update so the state machine holds even with concurrent
// writers; terminal states are unreachable as a `from` guard target once
// another writer has finalized the record.

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{PublicationRecord, PublicationStatus};
use crate::orchestrator::store::PublicationStore;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use tracing::{instrument, warn};
use uuid::Uuid;

pub struct PublicationRepository {
    pool: DbPool,
}

impl PublicationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<PublicationRecord, DatabaseError> {
        let status: String = row.try_get("status")?;

        Ok(PublicationRecord {
            id: row.try_get("id")?,
            content_item_id: row.try_get("content_item_id")?,
            account_id: row.try_get("account_id")?,
            list_id: row.try_get("list_id")?,
            user_id: row.try_get("user_id")?,
            status: PublicationStatus::from_str(&status).map_err(DatabaseError::QueryFailed)?,
            public_url: row.try_get("public_url")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            last_transition_at: row.try_get("last_transition_at")?,
        })
    }
}

#[async_trait]
impl PublicationStore for PublicationRepository {
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    async fn create(&self, record: &PublicationRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO publication_records (
                id, content_item_id, account_id, list_id, user_id,
                status, public_url, error_message, created_at, last_transition_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.content_item_id)
        .bind(record.account_id)
        .bind(record.list_id)
        .bind(record.user_id)
        .bind(record.status.to_string())
        .bind(&record.public_url)
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.last_transition_at)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, record_id: Uuid) -> Result<Option<PublicationRecord>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT id, content_item_id, account_id, list_id, user_id,
                   status, public_url, error_message, created_at, last_transition_at
            FROM publication_records
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    #[instrument(skip(self, public_url, error_message))]
    async fn transition(
        &self,
        record_id: Uuid,
        from: PublicationStatus,
        to: PublicationStatus,
        public_url: Option<String>,
        error_message: Option<String>,
    ) -> Result<bool, DatabaseError> {
        if !from.can_transition(to) {
            warn!(
                record_id = %record_id,
                from = %from,
                to = %to,
                "Rejecting transition outside the state machine"
            );
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE publication_records
            SET status = $1,
                public_url = $2,
                error_message = $3,
                last_transition_at = $4
            WHERE id = $5 AND status = $6
            "#,
        )
        .bind(to.to_string())
        .bind(&public_url)
        .bind(&error_message)
        .bind(Utc::now())
        .bind(record_id)
        .bind(from.to_string())
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn has_processing(&self, list_id: Uuid) -> Result<bool, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM publication_records
                WHERE list_id = $1 AND status = 'Processing'
            ) AS busy
            "#,
        )
        .bind(list_id)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get("busy")?)
    }
}
