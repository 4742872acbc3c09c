use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TaskRepo,
    },
    models::{NewTask, Task},
};

const TASK_COLUMNS: &str =
    "id, task_name, task_type, task_body, created_at, retry_at, last_error, retry_count";

pub struct SqliteTaskRepo {
    pool: SqlitePool,
}

impl SqliteTaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DbResult<Task> {
        let body_json: String = row.get("task_body");
        Ok(Task {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            task_name: row.get("task_name"),
            task_type: row.get("task_type"),
            task_body: serde_json::from_str(&body_json)
                .map_err(|e| DbError::Internal(e.to_string()))?,
            created_at: row.get("created_at"),
            retry_at: row.get("retry_at"),
            last_error: row.get("last_error"),
            retry_count: row.get("retry_count"),
        })
    }
}

#[async_trait]
impl TaskRepo for SqliteTaskRepo {
    async fn enqueue(&self, task: &NewTask) -> DbResult<Option<Task>> {
        let now = Utc::now();
        let body_json = serde_json::to_string(&task.task_body)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        let query = format!(
            r#"
            INSERT INTO tasks (id, task_name, task_type, task_body, created_at, retry_at, retry_count)
            VALUES (?, ?, ?, ?, ?5, ?5, 0)
            ON CONFLICT (task_name) DO NOTHING
            RETURNING {cols}
            "#,
            cols = TASK_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(Uuid::new_v4().to_string())
            .bind(task.task_name.as_deref())
            .bind(&task.task_type)
            .bind(&body_json)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn dequeue_batch(&self, limit: i64, lease: chrono::Duration) -> DbResult<Vec<Task>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // The write transaction is the lock; SQLite has no SKIP LOCKED.
        let query = format!(
            "SELECT {cols} FROM tasks WHERE retry_at <= ? ORDER BY retry_at ASC LIMIT ?",
            cols = TASK_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        let tasks: Vec<Task> = rows
            .iter()
            .map(Self::map_row)
            .collect::<DbResult<Vec<_>>>()?;

        for task in &tasks {
            sqlx::query("UPDATE tasks SET retry_at = ? WHERE id = ?")
                .bind(now + lease)
                .bind(task.id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(tasks)
    }

    async fn complete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET retry_count = retry_count + 1, last_error = ?, retry_at = ? \
             WHERE id = ?",
        )
        .bind(error)
        .bind(retry_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn count(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count"))
    }
}
