use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::GroupRepo,
    },
    models::{ConversationGroup, TASK_VECTOR_STORE_DELETE},
};

pub struct SqliteGroupRepo {
    pool: SqlitePool,
}

impl SqliteGroupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepo for SqliteGroupRepo {
    async fn create(&self, created_at: DateTime<Utc>) -> DbResult<ConversationGroup> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO conversation_groups (id, created_at) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(ConversationGroup {
            id,
            created_at,
            deleted_at: None,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<ConversationGroup>> {
        let row =
            sqlx::query("SELECT id, created_at, deleted_at FROM conversation_groups WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(Some(ConversationGroup {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                created_at: row.get("created_at"),
                deleted_at: row.get("deleted_at"),
            })),
            None => Ok(None),
        }
    }

    async fn soft_delete(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation_groups SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(group_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query(
            "UPDATE conversations SET deleted_at = ? WHERE group_id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(group_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn restore(&self, group_id: Uuid) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT deleted_at FROM conversation_groups WHERE id = ?")
            .bind(group_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
        if deleted_at.is_none() {
            return Err(DbError::Conflict(format!(
                "group {} is not deleted",
                group_id
            )));
        }

        sqlx::query("UPDATE conversation_groups SET deleted_at = NULL WHERE id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE conversations SET deleted_at = NULL WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count_evictable(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM conversation_groups \
             WHERE deleted_at IS NOT NULL AND deleted_at < ?",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count"))
    }

    async fn find_evictable_ids(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM conversation_groups \
             WHERE deleted_at IS NOT NULL AND deleted_at < ? \
             ORDER BY deleted_at LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect()
    }

    async fn evict_batch(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Uuid>> {
        // The write transaction is the claim; SQLite serializes writers,
        // so a competing worker sees the rows gone once this commits.
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id FROM conversation_groups \
             WHERE deleted_at IS NOT NULL AND deleted_at < ? \
             ORDER BY deleted_at LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows
            .into_iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect::<DbResult<Vec<_>>>()?;
        if ids.is_empty() {
            return Ok(ids);
        }

        let now = Utc::now();
        for group_id in &ids {
            let body = serde_json::json!({ "group_id": group_id }).to_string();
            sqlx::query(
                r#"
                INSERT INTO tasks (id, task_name, task_type, task_body, created_at, retry_at, retry_count)
                VALUES (?, ?, ?, ?, ?5, ?5, 0)
                ON CONFLICT (task_name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(format!("{}:{}", TASK_VECTOR_STORE_DELETE, group_id))
            .bind(TASK_VECTOR_STORE_DELETE)
            .bind(body)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM conversation_groups WHERE id = ?")
                .bind(group_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn hard_delete(&self, ids: &[Uuid]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut total = 0u64;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM conversation_groups WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            total += result.rows_affected();
        }
        tx.commit().await?;
        Ok(total)
    }
}
