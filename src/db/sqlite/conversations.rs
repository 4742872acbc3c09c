use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_uuid, parse_uuid_opt};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ConversationRepo, NewConversationRecord},
    },
    models::ConversationRecord,
};

const CONVERSATION_COLUMNS: &str = "id, group_id, owner_user_id, title, metadata, \
     forked_at_conversation_id, forked_at_entry_id, created_at, updated_at, \
     deleted_at, vectorized_at";

pub struct SqliteConversationRepo {
    pool: SqlitePool,
}

impl SqliteConversationRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DbResult<ConversationRecord> {
        let metadata_json: String = row.get("metadata");
        let forked_conv: Option<String> = row.get("forked_at_conversation_id");
        let forked_entry: Option<String> = row.get("forked_at_entry_id");

        Ok(ConversationRecord {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            group_id: parse_uuid(&row.get::<String, _>("group_id"))?,
            owner_user_id: parse_uuid(&row.get::<String, _>("owner_user_id"))?,
            title: row.get("title"),
            metadata: serde_json::from_str(&metadata_json)
                .map_err(|e| DbError::Internal(e.to_string()))?,
            forked_at_conversation_id: parse_uuid_opt(forked_conv.as_deref())?,
            forked_at_entry_id: parse_uuid_opt(forked_entry.as_deref())?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
            vectorized_at: row.get("vectorized_at"),
        })
    }
}

#[async_trait]
impl ConversationRepo for SqliteConversationRepo {
    async fn create(&self, input: NewConversationRecord) -> DbResult<ConversationRecord> {
        let metadata_json =
            serde_json::to_string(&input.metadata).map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, group_id, owner_user_id, title, metadata,
                 forked_at_conversation_id, forked_at_entry_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.id.to_string())
        .bind(input.group_id.to_string())
        .bind(input.owner_user_id.to_string())
        .bind(&input.title)
        .bind(&metadata_json)
        .bind(input.forked_at_conversation_id.map(|id| id.to_string()))
        .bind(input.forked_at_entry_id.map(|id| id.to_string()))
        .bind(input.created_at)
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
            WHERE c.id = ? AND c.deleted_at IS NULL
            AND EXISTS (
                SELECT 1 FROM conversation_groups g
                WHERE g.id = c.group_id AND g.deleted_at IS NULL
            )
            "#,
            cols = CONVERSATION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_any(&self, id: Uuid) -> DbResult<Option<ConversationRecord>> {
        let query = format!(
            "SELECT {cols} FROM conversations WHERE id = ?",
            cols = CONVERSATION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
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
            WHERE group_id = ? {deleted_filter}
            ORDER BY created_at ASC, id ASC
            "#,
            cols = CONVERSATION_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<ConversationRecord>> {
        let query = format!(
            r#"
            SELECT {cols} FROM conversations c
            JOIN memberships m ON m.group_id = c.group_id AND m.user_id = ?
            JOIN conversation_groups g ON g.id = c.group_id
            WHERE c.deleted_at IS NULL AND g.deleted_at IS NULL
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
            cols = "c.id, c.group_id, c.owner_user_id, c.title, c.metadata, \
                    c.forked_at_conversation_id, c.forked_at_entry_id, c.created_at, \
                    c.updated_at, c.deleted_at, c.vectorized_at"
        );

        let rows = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_forks(&self, parent_id: Uuid) -> DbResult<Vec<ConversationRecord>> {
        let query = format!(
            r#"
            SELECT {cols} FROM conversations
            WHERE forked_at_conversation_id = ? AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            "#,
            cols = CONVERSATION_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(parent_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn touch_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_owner_for_group(&self, group_id: Uuid, owner_user_id: Uuid) -> DbResult<u64> {
        let result = sqlx::query("UPDATE conversations SET owner_user_id = ? WHERE group_id = ?")
            .bind(owner_user_id.to_string())
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_vectorized_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE conversations SET vectorized_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
