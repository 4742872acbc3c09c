use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TaskRepo,
    },
    models::{NewTask, Task},
};

const TASK_COLUMNS: &str =
    "id, task_name, task_type, task_body, created_at, retry_at, last_error, retry_count";

pub struct PostgresTaskRepo {
    pool: PgPool,
}

impl PostgresTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Task {
        Task {
            id: row.get("id"),
            task_name: row.get("task_name"),
            task_type: row.get("task_type"),
            task_body: row.get("task_body"),
            created_at: row.get("created_at"),
            retry_at: row.get("retry_at"),
            last_error: row.get("last_error"),
            retry_count: row.get("retry_count"),
        }
    }
}

#[async_trait]
impl TaskRepo for PostgresTaskRepo {
    async fn enqueue(&self, task: &NewTask) -> DbResult<Option<Task>> {
        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO tasks (id, task_name, task_type, task_body, created_at, retry_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $5, 0)
            ON CONFLICT (task_name) DO NOTHING
            RETURNING {cols}
            "#,
            cols = TASK_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(task.task_name.as_deref())
            .bind(&task.task_type)
            .bind(&task.task_body)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::map_row))
    }

    async fn dequeue_batch(&self, limit: i64, lease: chrono::Duration) -> DbResult<Vec<Task>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED keeps concurrent workers from claiming the same rows.
        let query = format!(
            r#"
            SELECT {cols} FROM tasks
            WHERE retry_at <= $1
            ORDER BY retry_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
            cols = TASK_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        let tasks: Vec<Task> = rows.iter().map(Self::map_row).collect();

        if !tasks.is_empty() {
            let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
            sqlx::query("UPDATE tasks SET retry_at = $1 WHERE id = ANY($2)")
                .bind(now + lease)
                .bind(ids)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(tasks)
    }

    async fn complete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET retry_count = retry_count + 1, last_error = $2, retry_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(retry_at)
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
