use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::EntryRepo,
    },
    models::{Channel, EvictableEpoch, NewStoredEntry, StoredEntry, SyncGuard},
};

const ENTRY_COLUMNS: &str = "id, conversation_id, group_id, user_id, client_id, channel, \
     epoch, content_type, content, indexed_content, indexed_at, created_at";

/// Epoch tuples below the latest for their `(conversation, client)` whose
/// newest entry predates the cutoff. Shared by the eviction queries.
const EVICTABLE_EPOCHS_CTE: &str = r#"
    WITH latest AS (
        SELECT conversation_id, client_id, MAX(epoch) AS latest_epoch
        FROM entries
        WHERE channel = 'memory' AND client_id IS NOT NULL
        GROUP BY conversation_id, client_id
    ),
    evictable AS (
        SELECT e.conversation_id, e.client_id, e.epoch
        FROM entries e
        JOIN latest l
            ON l.conversation_id = e.conversation_id AND l.client_id = e.client_id
        WHERE e.channel = 'memory' AND e.epoch < l.latest_epoch
        GROUP BY e.conversation_id, e.client_id, e.epoch
        HAVING MAX(e.created_at) < $1
    )
"#;

pub struct PostgresEntryRepo {
    pool: PgPool,
}

impl PostgresEntryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> DbResult<StoredEntry> {
        let channel: String = row.get("channel");
        Ok(StoredEntry {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            group_id: row.get("group_id"),
            user_id: row.get("user_id"),
            client_id: row.get("client_id"),
            channel: channel.parse().map_err(DbError::Internal)?,
            epoch: row.get("epoch"),
            content_type: row.get("content_type"),
            content: row.get("content"),
            indexed_content: row.get("indexed_content"),
            indexed_at: row.get("indexed_at"),
            created_at: row.get("created_at"),
        })
    }

    fn stored(entry: NewStoredEntry) -> StoredEntry {
        StoredEntry {
            id: entry.id,
            conversation_id: entry.conversation_id,
            group_id: entry.group_id,
            user_id: entry.user_id,
            client_id: entry.client_id,
            channel: entry.channel,
            epoch: entry.epoch,
            content_type: entry.content_type,
            content: entry.content,
            indexed_content: None,
            indexed_at: None,
            created_at: entry.created_at,
        }
    }

    async fn insert_one(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewStoredEntry,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entries
                (id, conversation_id, group_id, user_id, client_id, channel,
                 epoch, content_type, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.conversation_id)
        .bind(entry.group_id)
        .bind(entry.user_id)
        .bind(entry.client_id.as_deref())
        .bind(entry.channel.as_str())
        .bind(entry.epoch)
        .bind(&entry.content_type)
        .bind(&entry.content)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Lock the conversation row so concurrent epoch resolution and guarded
    /// appends on the same conversation serialize.
    async fn lock_conversation(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: Uuid,
    ) -> DbResult<()> {
        let row = sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(conversation_id)
            .fetch_optional(&mut **tx)
            .await?;
        if row.is_none() {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Latest `(epoch, entry id)` for a memory key, inside a transaction.
    async fn latest_state(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: Uuid,
        client_id: &str,
    ) -> DbResult<(Option<i64>, Option<Uuid>)> {
        let row = sqlx::query(
            r#"
            SELECT epoch, id FROM entries
            WHERE conversation_id = $1 AND client_id = $2 AND channel = 'memory'
            ORDER BY epoch DESC, created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .bind(client_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok((row.get("epoch"), Some(row.get("id")))),
            None => Ok((None, None)),
        }
    }
}

#[async_trait]
impl EntryRepo for PostgresEntryRepo {
    async fn insert(&self, entries: &[NewStoredEntry]) -> DbResult<Vec<StoredEntry>> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            Self::insert_one(&mut tx, entry).await?;
        }
        tx.commit().await?;

        Ok(entries.iter().cloned().map(Self::stored).collect())
    }

    async fn insert_resolving_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        mut entries: Vec<NewStoredEntry>,
    ) -> DbResult<Vec<StoredEntry>> {
        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, conversation_id).await?;

        let (latest, _) = Self::latest_state(&mut tx, conversation_id, client_id).await?;
        let epoch = latest.unwrap_or(1);

        for entry in &mut entries {
            entry.epoch = Some(epoch);
        }
        for entry in &entries {
            Self::insert_one(&mut tx, entry).await?;
        }
        tx.commit().await?;

        Ok(entries.into_iter().map(Self::stored).collect())
    }

    async fn insert_guarded(
        &self,
        guard: SyncGuard,
        entry: NewStoredEntry,
    ) -> DbResult<StoredEntry> {
        let client_id = entry
            .client_id
            .clone()
            .ok_or_else(|| DbError::Validation("guarded insert requires a client id".into()))?;

        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, entry.conversation_id).await?;

        let (epoch, last_entry_id) =
            Self::latest_state(&mut tx, entry.conversation_id, &client_id).await?;
        if epoch != guard.epoch || last_entry_id != guard.last_entry_id {
            return Err(DbError::Conflict(
                "memory state changed since the sync decision".into(),
            ));
        }

        Self::insert_one(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok(Self::stored(entry))
    }

    async fn latest_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
    ) -> DbResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT MAX(epoch) as epoch FROM entries \
             WHERE conversation_id = $1 AND client_id = $2 AND channel = 'memory'",
        )
        .bind(conversation_id)
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("epoch"))
    }

    async fn list_latest_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
    ) -> DbResult<Vec<StoredEntry>> {
        let query = format!(
            r#"
            SELECT {cols} FROM entries
            WHERE conversation_id = $1 AND client_id = $2 AND channel = 'memory'
            AND epoch = (
                SELECT MAX(epoch) FROM entries
                WHERE conversation_id = $1 AND client_id = $2 AND channel = 'memory'
            )
            ORDER BY created_at ASC, id ASC
            "#,
            cols = ENTRY_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(conversation_id)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<StoredEntry>> {
        let query = format!(
            "SELECT {cols} FROM entries WHERE group_id = $1 ORDER BY created_at ASC, id ASC",
            cols = ENTRY_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn find_in_conversation(
        &self,
        conversation_id: Uuid,
        entry_id: Uuid,
    ) -> DbResult<Option<StoredEntry>> {
        let query = format!(
            "SELECT {cols} FROM entries WHERE id = $1 AND conversation_id = $2",
            cols = ENTRY_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(entry_id)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn set_indexed_content(&self, entry_id: Uuid, content: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE entries SET indexed_content = $2 WHERE id = $1")
            .bind(entry_id)
            .bind(content)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn set_indexed_at(&self, entry_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE entries SET indexed_at = $2 WHERE id = $1")
            .bind(entry_id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn list_unindexed(
        &self,
        limit: i64,
        after: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<StoredEntry>> {
        let after_filter = if after.is_some() {
            "AND created_at > $2"
        } else {
            ""
        };

        let query = format!(
            r#"
            SELECT {cols} FROM entries
            WHERE channel = '{history}' AND indexed_content IS NULL {after_filter}
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
            cols = ENTRY_COLUMNS,
            history = Channel::History.as_str(),
        );

        let mut q = sqlx::query(&query).bind(limit);
        if let Some(after) = after {
            q = q.bind(after);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<StoredEntry>> {
        let query = format!(
            r#"
            SELECT {cols} FROM entries
            WHERE channel = 'history' AND indexed_content IS NOT NULL AND indexed_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
            cols = ENTRY_COLUMNS
        );

        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn find_evictable_epochs(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<EvictableEpoch>> {
        let query = format!(
            "{cte} SELECT conversation_id, client_id, epoch FROM evictable \
             ORDER BY conversation_id, client_id, epoch",
            cte = EVICTABLE_EPOCHS_CTE
        );

        let rows = sqlx::query(&query).bind(cutoff).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| EvictableEpoch {
                conversation_id: row.get("conversation_id"),
                client_id: row.get("client_id"),
                epoch: row.get("epoch"),
            })
            .collect())
    }

    async fn count_evictable_epoch_entries(&self, cutoff: DateTime<Utc>) -> DbResult<i64> {
        let query = format!(
            r#"
            {cte}
            SELECT COUNT(*) as count FROM entries e
            JOIN evictable v
                ON v.conversation_id = e.conversation_id
                AND v.client_id = e.client_id
                AND v.epoch = e.epoch
            WHERE e.channel = 'memory'
            "#,
            cte = EVICTABLE_EPOCHS_CTE
        );

        let row = sqlx::query(&query).bind(cutoff).fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("count"))
    }

    async fn list_entry_ids_for_epochs(&self, epochs: &[EvictableEpoch]) -> DbResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        for key in epochs {
            let rows = sqlx::query(
                "SELECT id FROM entries \
                 WHERE conversation_id = $1 AND client_id = $2 AND epoch = $3 \
                 AND channel = 'memory'",
            )
            .bind(key.conversation_id)
            .bind(&key.client_id)
            .bind(key.epoch)
            .fetch_all(&self.pool)
            .await?;
            ids.extend(rows.into_iter().map(|row| row.get::<Uuid, _>("id")));
        }
        Ok(ids)
    }

    async fn delete_for_epochs(&self, epochs: &[EvictableEpoch]) -> DbResult<u64> {
        let mut total = 0u64;
        let mut tx = self.pool.begin().await?;
        for key in epochs {
            let result = sqlx::query(
                "DELETE FROM entries \
                 WHERE conversation_id = $1 AND client_id = $2 AND epoch = $3 \
                 AND channel = 'memory'",
            )
            .bind(key.conversation_id)
            .bind(&key.client_id)
            .bind(key.epoch)
            .execute(&mut *tx)
            .await?;
            total += result.rows_affected();
        }
        tx.commit().await?;
        Ok(total)
    }
}
