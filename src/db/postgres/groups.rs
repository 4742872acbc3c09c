use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::GroupRepo,
    },
    models::{ConversationGroup, TASK_VECTOR_STORE_DELETE},
};

pub struct PostgresGroupRepo {
    pool: PgPool,
}

impl PostgresGroupRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepo for PostgresGroupRepo {
    async fn create(&self, created_at: DateTime<Utc>) -> DbResult<ConversationGroup> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO conversation_groups (id, created_at) VALUES ($1, $2)")
            .bind(id)
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
        let row = sqlx::query(
            "SELECT id, created_at, deleted_at FROM conversation_groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ConversationGroup {
            id: row.get("id"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        }))
    }

    async fn soft_delete(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation_groups SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(group_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query(
            "UPDATE conversations SET deleted_at = $2 WHERE group_id = $1 AND deleted_at IS NULL",
        )
        .bind(group_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn restore(&self, group_id: Uuid) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT deleted_at FROM conversation_groups WHERE id = $1")
            .bind(group_id)
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

        sqlx::query("UPDATE conversation_groups SET deleted_at = NULL WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE conversations SET deleted_at = NULL WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn count_evictable(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM conversation_groups \
             WHERE deleted_at IS NOT NULL AND deleted_at < $1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count"))
    }

    async fn find_evictable_ids(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM conversation_groups
            WHERE deleted_at IS NOT NULL AND deleted_at < $1
            ORDER BY deleted_at
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn evict_batch(&self, cutoff: DateTime<Utc>, limit: i64) -> DbResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED keeps concurrent eviction workers off the same
        // batch; the rows stay locked until the delete below commits.
        let rows = sqlx::query(
            r#"
            SELECT id FROM conversation_groups
            WHERE deleted_at IS NOT NULL AND deleted_at < $1
            ORDER BY deleted_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows.into_iter().map(|row| row.get("id")).collect();
        if ids.is_empty() {
            return Ok(ids);
        }

        let now = Utc::now();
        for group_id in &ids {
            sqlx::query(
                r#"
                INSERT INTO tasks (id, task_name, task_type, task_body, created_at, retry_at, retry_count)
                VALUES ($1, $2, $3, $4, $5, $5, 0)
                ON CONFLICT (task_name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(format!("{}:{}", TASK_VECTOR_STORE_DELETE, group_id))
            .bind(TASK_VECTOR_STORE_DELETE)
            .bind(serde_json::json!({ "group_id": group_id }))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM conversation_groups WHERE id = ANY($1)")
            .bind(ids.clone())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }

    async fn hard_delete(&self, ids: &[Uuid]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM conversation_groups WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
