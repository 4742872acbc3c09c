//! Shared tests for GroupRepo implementations

use chrono::Duration;

use super::fixtures::{seed_conversation, seed_group, ts};
use crate::db::{DbError, DbPool};

pub async fn test_create_and_find(db: &DbPool) {
    let group = seed_group(db).await;

    let fetched = db
        .groups()
        .find_by_id(group.id)
        .await
        .expect("Failed to find")
        .expect("Should exist");

    assert_eq!(fetched.id, group.id);
    assert!(fetched.deleted_at.is_none());
}

pub async fn test_find_missing_returns_none(db: &DbPool) {
    let result = db
        .groups()
        .find_by_id(uuid::Uuid::new_v4())
        .await
        .expect("Failed to query");
    assert!(result.is_none());
}

pub async fn test_soft_delete_marks_group_and_conversations(db: &DbPool) {
    let group = seed_group(db).await;
    let conversation = seed_conversation(db, group.id, uuid::Uuid::new_v4()).await;

    db.groups()
        .soft_delete(group.id, ts(10))
        .await
        .expect("Failed to soft delete");

    let fetched = db.groups().find_by_id(group.id).await.unwrap().unwrap();
    assert!(fetched.deleted_at.is_some());

    // The conversation went with it.
    assert!(
        db.conversations()
            .find_active(conversation.id)
            .await
            .unwrap()
            .is_none()
    );
    let any = db
        .conversations()
        .find_any(conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert!(any.deleted_at.is_some());
}

pub async fn test_soft_delete_missing_group(db: &DbPool) {
    let result = db.groups().soft_delete(uuid::Uuid::new_v4(), ts(0)).await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

pub async fn test_restore_clears_deletion(db: &DbPool) {
    let group = seed_group(db).await;
    let conversation = seed_conversation(db, group.id, uuid::Uuid::new_v4()).await;

    db.groups().soft_delete(group.id, ts(10)).await.unwrap();
    db.groups().restore(group.id).await.expect("Failed to restore");

    let fetched = db.groups().find_by_id(group.id).await.unwrap().unwrap();
    assert!(fetched.deleted_at.is_none());
    assert!(
        db.conversations()
            .find_active(conversation.id)
            .await
            .unwrap()
            .is_some()
    );
}

pub async fn test_restore_not_deleted_is_conflict(db: &DbPool) {
    let group = seed_group(db).await;
    let result = db.groups().restore(group.id).await;
    assert!(matches!(result, Err(DbError::Conflict(_))));
}

pub async fn test_evictable_respects_cutoff(db: &DbPool) {
    let old_group = seed_group(db).await;
    let fresh_group = seed_group(db).await;

    let now = ts(0);
    db.groups()
        .soft_delete(old_group.id, now - Duration::days(60))
        .await
        .unwrap();
    db.groups()
        .soft_delete(fresh_group.id, now - Duration::days(1))
        .await
        .unwrap();

    let cutoff = now - Duration::days(30);
    assert_eq!(db.groups().count_evictable(cutoff).await.unwrap(), 1);

    let ids = db.groups().find_evictable_ids(cutoff, 10).await.unwrap();
    assert_eq!(ids, vec![old_group.id]);
}

pub async fn test_evict_batch_claims_and_deletes(db: &DbPool) {
    let old_group = seed_group(db).await;
    let fresh_group = seed_group(db).await;
    let conversation = seed_conversation(db, old_group.id, uuid::Uuid::new_v4()).await;

    let now = ts(0);
    db.groups()
        .soft_delete(old_group.id, now - Duration::days(60))
        .await
        .unwrap();
    db.groups()
        .soft_delete(fresh_group.id, now - Duration::days(1))
        .await
        .unwrap();

    let cutoff = now - Duration::days(30);
    let evicted = db.groups().evict_batch(cutoff, 10).await.unwrap();
    assert_eq!(evicted, vec![old_group.id]);

    // Deleted with cascade, and exactly one cleanup task enqueued.
    assert!(db.groups().find_by_id(old_group.id).await.unwrap().is_none());
    assert!(
        db.conversations()
            .find_any(conversation.id)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(db.tasks().count().await.unwrap(), 1);

    // The batch was consumed; a second pass finds nothing.
    assert!(db.groups().evict_batch(cutoff, 10).await.unwrap().is_empty());
    assert!(db.groups().find_by_id(fresh_group.id).await.unwrap().is_some());
}

pub async fn test_hard_delete_cascades(db: &DbPool) {
    let group = seed_group(db).await;
    let conversation = seed_conversation(db, group.id, uuid::Uuid::new_v4()).await;

    let deleted = db.groups().hard_delete(&[group.id]).await.unwrap();
    assert_eq!(deleted, 1);

    assert!(db.groups().find_by_id(group.id).await.unwrap().is_none());
    assert!(
        db.conversations()
            .find_any(conversation.id)
            .await
            .unwrap()
            .is_none()
    );
}

pub async fn test_hard_delete_empty_batch(db: &DbPool) {
    assert_eq!(db.groups().hard_delete(&[]).await.unwrap(), 0);
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use crate::db::tests::sqlite_test;

    sqlite_test!(test_create_and_find);
    sqlite_test!(test_find_missing_returns_none);
    sqlite_test!(test_soft_delete_marks_group_and_conversations);
    sqlite_test!(test_soft_delete_missing_group);
    sqlite_test!(test_restore_clears_deletion);
    sqlite_test!(test_restore_not_deleted_is_conflict);
    sqlite_test!(test_evictable_respects_cutoff);
    sqlite_test!(test_evict_batch_claims_and_deletes);
    sqlite_test!(test_hard_delete_cascades);
    sqlite_test!(test_hard_delete_empty_batch);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::tests::postgres_test;

    postgres_test!(test_create_and_find);
    postgres_test!(test_find_missing_returns_none);
    postgres_test!(test_soft_delete_marks_group_and_conversations);
    postgres_test!(test_soft_delete_missing_group);
    postgres_test!(test_restore_clears_deletion);
    postgres_test!(test_restore_not_deleted_is_conflict);
    postgres_test!(test_evictable_respects_cutoff);
    postgres_test!(test_evict_batch_claims_and_deletes);
    postgres_test!(test_hard_delete_cascades);
    postgres_test!(test_hard_delete_empty_batch);
}
