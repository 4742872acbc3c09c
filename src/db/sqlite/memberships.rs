use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::MembershipRepo,
    },
    models::Membership,
};

pub struct SqliteMembershipRepo {
    pool: SqlitePool,
}

impl SqliteMembershipRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DbResult<Membership> {
        let level: String = row.get("access_level");
        Ok(Membership {
            group_id: parse_uuid(&row.get::<String, _>("group_id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            access_level: level.parse().map_err(DbError::Internal)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl MembershipRepo for SqliteMembershipRepo {
    async fn upsert(&self, membership: &Membership) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (group_id, user_id, access_level, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (group_id, user_id) DO UPDATE SET access_level = excluded.access_level
            "#,
        )
        .bind(membership.group_id.to_string())
        .bind(membership.user_id.to_string())
        .bind(membership.access_level.as_str())
        .bind(membership.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, group_id: Uuid, user_id: Uuid) -> DbResult<Option<Membership>> {
        let row = sqlx::query(
            "SELECT group_id, user_id, access_level, created_at FROM memberships \
             WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT group_id, user_id, access_level, created_at FROM memberships \
             WHERE group_id = ? ORDER BY created_at ASC, user_id ASC",
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn delete(&self, group_id: Uuid, user_id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM memberships WHERE group_id = ? AND user_id = ?")
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_by_group(&self, group_id: Uuid) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM memberships WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
