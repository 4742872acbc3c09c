use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TransferRepo,
    },
    models::{OwnershipTransfer, TransferRole},
};

pub struct SqliteTransferRepo {
    pool: SqlitePool,
}

impl SqliteTransferRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DbResult<OwnershipTransfer> {
        Ok(OwnershipTransfer {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            group_id: parse_uuid(&row.get::<String, _>("group_id"))?,
            from_user_id: parse_uuid(&row.get::<String, _>("from_user_id"))?,
            to_user_id: parse_uuid(&row.get::<String, _>("to_user_id"))?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TransferRepo for SqliteTransferRepo {
    async fn create(&self, transfer: &OwnershipTransfer) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO ownership_transfers (id, group_id, from_user_id, to_user_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.id.to_string())
        .bind(transfer.group_id.to_string())
        .bind(transfer.from_user_id.to_string())
        .bind(transfer.to_user_id.to_string())
        .bind(transfer.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return Err(DbError::Conflict(format!(
                        "group {} already has a pending transfer",
                        transfer.group_id
                    )));
                }
                Err(e.into())
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            "SELECT id, group_id, from_user_id, to_user_id, created_at \
             FROM ownership_transfers WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_by_group(&self, group_id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            "SELECT id, group_id, from_user_id, to_user_id, created_at \
             FROM ownership_transfers WHERE group_id = ?",
        )
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        role: TransferRole,
    ) -> DbResult<Vec<OwnershipTransfer>> {
        let filter = match role {
            TransferRole::Sender => "from_user_id = ?",
            TransferRole::Recipient => "to_user_id = ?",
            TransferRole::All => "(from_user_id = ?1 OR to_user_id = ?1)",
        };

        let query = format!(
            "SELECT id, group_id, from_user_id, to_user_id, created_at \
             FROM ownership_transfers WHERE {filter} ORDER BY created_at DESC, id DESC"
        );

        let rows = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM ownership_transfers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_by_group(&self, group_id: Uuid) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM ownership_transfers WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
