use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TransferRepo,
    },
    models::{OwnershipTransfer, TransferRole},
};

pub struct PostgresTransferRepo {
    pool: PgPool,
}

impl PostgresTransferRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> OwnershipTransfer {
        OwnershipTransfer {
            id: row.get("id"),
            group_id: row.get("group_id"),
            from_user_id: row.get("from_user_id"),
            to_user_id: row.get("to_user_id"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl TransferRepo for PostgresTransferRepo {
    async fn create(&self, transfer: &OwnershipTransfer) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO ownership_transfers (id, group_id, from_user_id, to_user_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.group_id)
        .bind(transfer.from_user_id)
        .bind(transfer.to_user_id)
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
             FROM ownership_transfers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::map_row))
    }

    async fn find_by_group(&self, group_id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            "SELECT id, group_id, from_user_id, to_user_id, created_at \
             FROM ownership_transfers WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::map_row))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        role: TransferRole,
    ) -> DbResult<Vec<OwnershipTransfer>> {
        let filter = match role {
            TransferRole::Sender => "from_user_id = $1",
            TransferRole::Recipient => "to_user_id = $1",
            TransferRole::All => "(from_user_id = $1 OR to_user_id = $1)",
        };

        let query = format!(
            "SELECT id, group_id, from_user_id, to_user_id, created_at \
             FROM ownership_transfers WHERE {filter} ORDER BY created_at DESC, id DESC"
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::map_row).collect())
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM ownership_transfers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_by_group(&self, group_id: Uuid) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM ownership_transfers WHERE group_id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
