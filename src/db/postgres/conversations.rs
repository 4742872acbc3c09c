use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::DbResult,
        repos::{ConversationRepo, NewConversationRecord},
    },
    models::ConversationRecord,
};

const CONVERSATION_COLUMNS: &str = "id, group_id, owner_user_id, title, metadata, \
     forked_at_conversation_id, forked_at_entry_id, created_at, updated_at, \
     deleted_at, vectorized_at";

pub struct PostgresConversationRepo {
    pool: PgPool,
}

impl PostgresConversationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> ConversationRecord {
        ConversationRecord {
            id: row.get("id"),
            group_id: row.get("group_id"),
            owner_user_id: row.get("owner_user_id"),
            title: row.get("title"),
            metadata: row.get("metadata"),
            forked_at_conversation_id: row.get("forked_at_conversation_id"),
            forked_at_entry_id: row.get("forked_at_entry_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
            vectorized_at: row.get("vectorized_at"),
        }
    }
}

#[async_trait]
impl ConversationRepo for PostgresConversationRepo {
    async fn create(&self, input: NewConversationRecord) -> DbResult<ConversationRecord> {
        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, group_id, owner_user_id, title, metadata,
                 forked_at_conversation_id, forked_at_entry_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(input.id)
        .bind(input.group_id)
        .bind(input.owner_user_id)
        .bind(&input.title)
        .bind(&input.metadata)
        .bind(input.forked_at_conversation_id)
        .bind(input.forked_at_entry_id)
        .bind(input.created_at)
        .execute(&self.pool)
        .await?;

        Ok(ConversationRecord {
            id: input.id,
            group_id: input.group_id,
            owner_user_id: input.owner_user_id,
            title: input.title,
            metadata: input.metadata,
            forked_at_conversation_id: input.forked_at_conversation_id,
            forked_at_entry_id: input.forked_at_entry_id,
            created_at: input.created_at,
            updated_at: input.created_at,
            deleted_at: None,
            vectorized_at: None,
        })
    }

    async fn find_active(&self, id: Uuid) -> DbResult<Option<ConversationRecord>> {
        let query = format!(
            r#"
            SELECT {cols} FROM conversations c
            WHERE c.id = $1 AND c.deleted_at IS NULL
            AND EXISTS (
                SELECT 1 FROM conversation_groups g
                WHERE g.id = c.group_id AND g.deleted_at IS NULL
            )
            "#,
            cols = CONVERSATION_COLUMNS
        );

        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(Self::map_row))
    }

    async fn find_any(&self, id: Uuid) -> DbResult<Option<ConversationRecord>> {
        let query = format!(
            "SELECT {cols} FROM conversations WHERE id = $1",
            cols = CONVERSATION_COLUMNS
        );

        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(Self::map_row))
    }

    async fn list_in_group(
        &self,
        group_id: Uuid,
        include_deleted: bool,
    ) -> DbResult<Vec<ConversationRecord>> {
        let deleted_filter = if include_deleted {
            ""
        } else {
            "AND deleted_at IS NULL"
        };

        let query = format!(
            r#"
            SELECT {cols} FROM conversations
            WHERE group_id = $1 {deleted_filter}
            ORDER BY created_at ASC, id ASC
            "#,
            cols = CONVERSATION_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<ConversationRecord>> {
        let query = format!(
            r#"
            SELECT {cols} FROM conversations c
            JOIN memberships m ON m.group_id = c.group_id AND m.user_id = $1
            JOIN conversation_groups g ON g.id = c.group_id
            WHERE c.deleted_at IS NULL AND g.deleted_at IS NULL
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
            cols = "c.id, c.group_id, c.owner_user_id, c.title, c.metadata, \
                    c.forked_at_conversation_id, c.forked_at_entry_id, c.created_at, \
                    c.updated_at, c.deleted_at, c.vectorized_at"
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn list_forks(&self, parent_id: Uuid) -> DbResult<Vec<ConversationRecord>> {
        let query = format!(
            r#"
            SELECT {cols} FROM conversations
            WHERE forked_at_conversation_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
            cols = CONVERSATION_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn touch_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_owner_for_group(&self, group_id: Uuid, owner_user_id: Uuid) -> DbResult<u64> {
        let result = sqlx::query("UPDATE conversations SET owner_user_id = $2 WHERE group_id = $1")
            .bind(group_id)
            .bind(owner_user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_vectorized_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE conversations SET vectorized_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
