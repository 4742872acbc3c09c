use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_uuid, parse_uuid_opt};
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
/// newest entry predates the cutoff. The document-store role approximates
/// the Postgres windowed query with the same aggregate scan.
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
        HAVING MAX(e.created_at) < ?1
    )
"#;

pub struct SqliteEntryRepo {
    pool: SqlitePool,
}

impl SqliteEntryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DbResult<StoredEntry> {
        let channel: String = row.get("channel");
        let user_id: Option<String> = row.get("user_id");

        Ok(StoredEntry {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            conversation_id: parse_uuid(&row.get::<String, _>("conversation_id"))?,
            group_id: parse_uuid(&row.get::<String, _>("group_id"))?,
            user_id: parse_uuid_opt(user_id.as_deref())?,
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

    async fn insert_one(tx: &mut Transaction<'_, Sqlite>, entry: &NewStoredEntry) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entries
                (id, conversation_id, group_id, user_id, client_id, channel,
                 epoch, content_type, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.conversation_id.to_string())
        .bind(entry.group_id.to_string())
        .bind(entry.user_id.map(|id| id.to_string()))
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

    /// Latest `(epoch, entry id)` for a memory key, inside a transaction.
    /// SQLite transactions serialize writers, which is the lock here.
    async fn latest_state(
        tx: &mut Transaction<'_, Sqlite>,
        conversation_id: Uuid,
        client_id: &str,
    ) -> DbResult<(Option<i64>, Option<Uuid>)> {
        let row = sqlx::query(
            r#"
            SELECT epoch, id FROM entries
            WHERE conversation_id = ? AND client_id = ? AND channel = 'memory'
            ORDER BY epoch DESC, created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(client_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => {
                let id = parse_uuid(&row.get::<String, _>("id"))?;
                Ok((row.get("epoch"), Some(id)))
            }
            None => Ok((None, None)),
        }
    }
}

#[async_trait]
impl EntryRepo for SqliteEntryRepo {
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
             WHERE conversation_id = ? AND client_id = ? AND channel = 'memory'",
        )
        .bind(conversation_id.to_string())
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
            WHERE conversation_id = ?1 AND client_id = ?2 AND channel = 'memory'
            AND epoch = (
                SELECT MAX(epoch) FROM entries
                WHERE conversation_id = ?1 AND client_id = ?2 AND channel = 'memory'
            )
            ORDER BY created_at ASC, id ASC
            "#,
            cols = ENTRY_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(conversation_id.to_string())
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<StoredEntry>> {
        let query = format!(
            "SELECT {cols} FROM entries WHERE group_id = ? ORDER BY created_at ASC, id ASC",
            cols = ENTRY_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(group_id.to_string())
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
            "SELECT {cols} FROM entries WHERE id = ? AND conversation_id = ?",
            cols = ENTRY_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(entry_id.to_string())
            .bind(conversation_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn set_indexed_content(&self, entry_id: Uuid, content: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE entries SET indexed_content = ? WHERE id = ?")
            .bind(content)
            .bind(entry_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn set_indexed_at(&self, entry_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE entries SET indexed_at = ? WHERE id = ?")
            .bind(at)
            .bind(entry_id.to_string())
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
            "AND created_at > ?2"
        } else {
            ""
        };

        let query = format!(
            r#"
            SELECT {cols} FROM entries
            WHERE channel = '{history}' AND indexed_content IS NULL {after_filter}
            ORDER BY created_at ASC, id ASC
            LIMIT ?1
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
            LIMIT ?
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
        rows.into_iter()
            .map(|row| {
                Ok(EvictableEpoch {
                    conversation_id: parse_uuid(&row.get::<String, _>("conversation_id"))?,
                    client_id: row.get("client_id"),
                    epoch: row.get("epoch"),
                })
            })
            .collect()
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
                 WHERE conversation_id = ? AND client_id = ? AND epoch = ? \
                 AND channel = 'memory'",
            )
            .bind(key.conversation_id.to_string())
            .bind(&key.client_id)
            .bind(key.epoch)
            .fetch_all(&self.pool)
            .await?;

            for row in rows {
                ids.push(parse_uuid(&row.get::<String, _>("id"))?);
            }
        }
        Ok(ids)
    }

    async fn delete_for_epochs(&self, epochs: &[EvictableEpoch]) -> DbResult<u64> {
        let mut total = 0u64;
        let mut tx = self.pool.begin().await?;
        for key in epochs {
            let result = sqlx::query(
                "DELETE FROM entries \
                 WHERE conversation_id = ? AND client_id = ? AND epoch = ? \
                 AND channel = 'memory'",
            )
            .bind(key.conversation_id.to_string())
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
