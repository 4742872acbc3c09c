//! Shared tests for TransferRepo implementations

use uuid::Uuid;

use super::fixtures::{seed_group, ts};
use crate::{
    db::{DbError, DbPool},
    models::{OwnershipTransfer, TransferRole},
};

fn transfer(group_id: Uuid, from: Uuid, to: Uuid) -> OwnershipTransfer {
    OwnershipTransfer {
        id: Uuid::new_v4(),
        group_id,
        from_user_id: from,
        to_user_id: to,
        created_at: ts(0),
    }
}

pub async fn test_create_and_find(db: &DbPool) {
    let group = seed_group(db).await;
    let t = transfer(group.id, Uuid::new_v4(), Uuid::new_v4());

    db.transfers().create(&t).await.expect("Failed to create");

    let by_id = db.transfers().find_by_id(t.id).await.unwrap().unwrap();
    assert_eq!(by_id.group_id, group.id);
    assert_eq!(by_id.from_user_id, t.from_user_id);
    assert_eq!(by_id.to_user_id, t.to_user_id);

    let by_group = db.transfers().find_by_group(group.id).await.unwrap().unwrap();
    assert_eq!(by_group.id, t.id);
}

pub async fn test_duplicate_pending_is_conflict(db: &DbPool) {
    let group = seed_group(db).await;
    let first = transfer(group.id, Uuid::new_v4(), Uuid::new_v4());
    let second = transfer(group.id, Uuid::new_v4(), Uuid::new_v4());

    db.transfers().create(&first).await.unwrap();
    let result = db.transfers().create(&second).await;
    assert!(matches!(result, Err(DbError::Conflict(_))));
}

pub async fn test_list_for_user_roles(db: &DbPool) {
    let group_a = seed_group(db).await;
    let group_b = seed_group(db).await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let sent = transfer(group_a.id, alice, bob);
    let received = transfer(group_b.id, bob, alice);
    db.transfers().create(&sent).await.unwrap();
    db.transfers().create(&received).await.unwrap();

    let as_sender = db
        .transfers()
        .list_for_user(alice, TransferRole::Sender)
        .await
        .unwrap();
    assert_eq!(as_sender.iter().map(|t| t.id).collect::<Vec<_>>(), vec![sent.id]);

    let as_recipient = db
        .transfers()
        .list_for_user(alice, TransferRole::Recipient)
        .await
        .unwrap();
    assert_eq!(
        as_recipient.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![received.id]
    );

    let all = db
        .transfers()
        .list_for_user(alice, TransferRole::All)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

pub async fn test_delete(db: &DbPool) {
    let group = seed_group(db).await;
    let t = transfer(group.id, Uuid::new_v4(), Uuid::new_v4());

    db.transfers().create(&t).await.unwrap();
    db.transfers().delete(t.id).await.unwrap();
    assert!(db.transfers().find_by_id(t.id).await.unwrap().is_none());

    let result = db.transfers().delete(t.id).await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

pub async fn test_delete_by_group(db: &DbPool) {
    let group = seed_group(db).await;
    let t = transfer(group.id, Uuid::new_v4(), Uuid::new_v4());
    db.transfers().create(&t).await.unwrap();

    assert_eq!(db.transfers().delete_by_group(group.id).await.unwrap(), 1);
    assert!(db.transfers().find_by_group(group.id).await.unwrap().is_none());
    assert_eq!(db.transfers().delete_by_group(group.id).await.unwrap(), 0);
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use crate::db::tests::sqlite_test;

    sqlite_test!(test_create_and_find);
    sqlite_test!(test_duplicate_pending_is_conflict);
    sqlite_test!(test_list_for_user_roles);
    sqlite_test!(test_delete);
    sqlite_test!(test_delete_by_group);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::tests::postgres_test;

    postgres_test!(test_create_and_find);
    postgres_test!(test_duplicate_pending_is_conflict);
    postgres_test!(test_list_for_user_roles);
    postgres_test!(test_delete);
    postgres_test!(test_delete_by_group);
}
