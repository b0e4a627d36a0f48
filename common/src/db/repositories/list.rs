// Auto-list repository: schedule specs, list metadata, the round-robin
// content cursor, and destination account bindings.

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{
    AutoList, ContentItem, DestinationAccount, MediaKind, Platform, ScheduleSpec,
};
use crate::orchestrator::store::ListStore;
use async_trait::async_trait;
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct ListRepository {
    pool: DbPool,
}

impl ListRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn spec_from_row(row: &sqlx::postgres::PgRow) -> Result<ScheduleSpec, DatabaseError> {
        let mask: i16 = row.try_get("days_of_week_mask")?;

        Ok(ScheduleSpec {
            id: row.try_get("id")?,
            list_id: row.try_get("list_id")?,
            days_of_week_mask: u8::try_from(mask).map_err(|_| {
                DatabaseError::QueryFailed(format!("Day mask {} out of range", mask))
            })?,
            time_of_day: row.try_get("time_of_day")?,
        })
    }

    fn list_from_row(row: &sqlx::postgres::PgRow) -> Result<AutoList, DatabaseError> {
        Ok(AutoList {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            enabled: row.try_get("enabled")?,
            queue_position: row.try_get("queue_position")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn item_from_row(row: &sqlx::postgres::PgRow) -> Result<ContentItem, DatabaseError> {
        let media_kind: String = row.try_get("media_kind")?;
        let media_kind = match media_kind.as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            other => {
                return Err(DatabaseError::QueryFailed(format!(
                    "Unknown media kind: {}",
                    other
                )));
            }
        };

        Ok(ContentItem {
            id: row.try_get("id")?,
            list_id: row.try_get("list_id")?,
            position: row.try_get("position")?,
            media_kind,
            media_url: row.try_get("media_url")?,
            caption: row.try_get("caption")?,
        })
    }

    fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<DestinationAccount, DatabaseError> {
        let platform: String = row.try_get("platform")?;

        Ok(DestinationAccount {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            platform: Platform::from_str(&platform).map_err(DatabaseError::QueryFailed)?,
            external_account_id: row.try_get("external_account_id")?,
        })
    }
}

#[async_trait]
impl ListStore for ListRepository {
    #[instrument(skip(self))]
    async fn find_enabled_specs(&self) -> Result<Vec<ScheduleSpec>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.list_id, s.days_of_week_mask, s.time_of_day
            FROM schedule_specs s
            JOIN auto_lists l ON l.id = s.list_id
            WHERE l.enabled = true
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        let specs = rows
            .iter()
            .map(Self::spec_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = specs.len(), "Loaded enabled schedule specs");
        Ok(specs)
    }

    #[instrument(skip(self))]
    async fn get_list(&self, list_id: Uuid) -> Result<Option<AutoList>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, enabled, queue_position, created_at
            FROM auto_lists
            WHERE id = $1
            "#,
        )
        .bind(list_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(Self::list_from_row).transpose()
    }

    /// Select the item at the queue cursor and advance the cursor inside one
    /// transaction. The row lock on the list serializes concurrent pops.
    #[instrument(skip(self))]
    async fn pop_next_content_item(
        &self,
        list_id: Uuid,
    ) -> Result<Option<ContentItem>, DatabaseError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let cursor_row = sqlx::query(
            "SELECT queue_position FROM auto_lists WHERE id = $1 FOR UPDATE",
        )
        .bind(list_id)
        .fetch_optional(&mut *tx)
        .await?;

        let cursor: i32 = match cursor_row {
            Some(row) => row.try_get("queue_position")?,
            None => return Ok(None),
        };

        let count_row = sqlx::query("SELECT COUNT(*) AS n FROM content_items WHERE list_id = $1")
            .bind(list_id)
            .fetch_one(&mut *tx)
            .await?;
        let count: i64 = count_row.try_get("n")?;

        if count == 0 {
            return Ok(None);
        }

        // Wrap past the end: the queue is logically circular.
        let offset = (cursor as i64).rem_euclid(count);

        let item_row = sqlx::query(
            r#"
            SELECT id, list_id, position, media_kind, media_url, caption
            FROM content_items
            WHERE list_id = $1
            ORDER BY position ASC
            OFFSET $2
            LIMIT 1
            "#,
        )
        .bind(list_id)
        .bind(offset)
        .fetch_one(&mut *tx)
        .await?;

        let item = Self::item_from_row(&item_row)?;

        sqlx::query("UPDATE auto_lists SET queue_position = $1 WHERE id = $2")
            .bind((offset + 1) as i32)
            .bind(list_id)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        debug!(item_id = %item.id, cursor = offset, "Popped content item");
        Ok(Some(item))
    }

    #[instrument(skip(self))]
    async fn destination_accounts(
        &self,
        list_id: Uuid,
    ) -> Result<Vec<DestinationAccount>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.user_id, a.platform, a.external_account_id
            FROM destination_accounts a
            JOIN list_accounts la ON la.account_id = a.id
            WHERE la.list_id = $1
            "#,
        )
        .bind(list_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(Self::account_from_row).collect()
    }
}
