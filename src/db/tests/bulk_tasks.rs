//! Bulk task store tests.

use super::*;
use crate::types::BulkTaskStatus;

#[tokio::test]
async fn bulk_task_lifecycle_pending_processing_completed() {
    let db = test_db().await;
    let user = seed_user(&db, "alice", "user").await;

    let id = db
        .insert_bulk_task(user, r#"[{"provider":"webshare","external_id":"a"}]"#, None, 1)
        .await
        .unwrap();

    let row = db.get_bulk_task(id).await.unwrap().unwrap();
    assert_eq!(row.status(), BulkTaskStatus::Pending);
    assert_eq!(row.total_items, 1);

    let claimed = db.claim_pending_bulk_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status(), BulkTaskStatus::Processing);

    db.bump_bulk_progress(id, 1, 0).await.unwrap();
    db.complete_bulk_task(id, 1, 0).await.unwrap();

    let row = db.get_bulk_task(id).await.unwrap().unwrap();
    assert_eq!(row.status(), BulkTaskStatus::Completed);
    assert_eq!(
        row.processed_items + row.failed_items,
        row.total_items,
        "terminal accounting must balance"
    );
}

#[tokio::test]
async fn claim_returns_oldest_pending_first() {
    let db = test_db().await;
    let user = seed_user(&db, "alice", "user").await;

    let first = db.insert_bulk_task(user, "[]", None, 0).await.unwrap();
    let _second = db.insert_bulk_task(user, "[]", None, 0).await.unwrap();

    let claimed = db.claim_pending_bulk_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, first, "tasks are claimed in submission order");
}

#[tokio::test]
async fn claim_on_empty_queue_returns_none() {
    let db = test_db().await;
    assert!(db.claim_pending_bulk_task().await.unwrap().is_none());
}

#[tokio::test]
async fn a_task_is_never_claimed_twice() {
    let db = test_db().await;
    let user = seed_user(&db, "alice", "user").await;
    db.insert_bulk_task(user, "[]", None, 0).await.unwrap();

    assert!(db.claim_pending_bulk_task().await.unwrap().is_some());
    assert!(
        db.claim_pending_bulk_task().await.unwrap().is_none(),
        "a processing task must not be claimed again"
    );
}

#[tokio::test]
async fn stuck_processing_tasks_requeue_on_startup() {
    let db = test_db().await;
    let user = seed_user(&db, "alice", "user").await;
    let id = db.insert_bulk_task(user, "[]", None, 3).await.unwrap();
    db.claim_pending_bulk_task().await.unwrap();
    db.bump_bulk_progress(id, 1, 1).await.unwrap();

    // The resolver died mid-batch; nothing will finish this row
    let reset = db.requeue_stuck_bulk_tasks().await.unwrap();
    assert_eq!(reset, 1);

    let row = db.get_bulk_task(id).await.unwrap().unwrap();
    assert_eq!(row.status(), BulkTaskStatus::Pending);
    assert_eq!(
        (row.processed_items, row.failed_items),
        (1, 1),
        "recorded progress survives the reset so processing can resume"
    );

    // The task is claimable again
    let claimed = db.claim_pending_bulk_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
}

#[tokio::test]
async fn fail_records_error_text_and_counts() {
    let db = test_db().await;
    let user = seed_user(&db, "alice", "user").await;
    let id = db.insert_bulk_task(user, "[]", None, 50).await.unwrap();
    db.claim_pending_bulk_task().await.unwrap();

    db.fail_bulk_task(id, 47, 3, "provider unusable").await.unwrap();

    let row = db.get_bulk_task(id).await.unwrap().unwrap();
    assert_eq!(row.status(), BulkTaskStatus::Failed);
    assert_eq!(row.processed_items, 47);
    assert_eq!(row.failed_items, 3);
    assert_eq!(row.error_text.as_deref(), Some("provider unusable"));
}

#[tokio::test]
async fn finishing_a_non_processing_task_is_rejected() {
    let db = test_db().await;
    let user = seed_user(&db, "alice", "user").await;
    let id = db.insert_bulk_task(user, "[]", None, 0).await.unwrap();

    // Still pending: completing it skips the processing state
    let err = db.complete_bulk_task(id, 0, 0).await.unwrap_err();
    assert!(err.to_string().contains("not processing"));
}
