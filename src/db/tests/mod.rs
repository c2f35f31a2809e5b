//! Store tests against an in-memory SQLite database.

use super::*;
use crate::db::{Database, NewJob};
use crate::types::{Category, JobStatus, PauseSource};

mod bulk_tasks;

/// Fresh in-memory store with migrations applied
pub(crate) async fn test_db() -> Database {
    Database::new("sqlite::memory:")
        .await
        .expect("in-memory store must open")
}

/// Seed a user and return its id
pub(crate) async fn seed_user(db: &Database, username: &str, role: &str) -> i64 {
    db.insert_user(username, role, Some(&format!("token-{username}")))
        .await
        .expect("user insert must succeed")
}

/// Seed an enabled provider and return its id
pub(crate) async fn seed_provider(db: &Database, key: &str) -> i64 {
    db.insert_provider(key, true, Some("{}"))
        .await
        .expect("provider insert must succeed")
}

/// Build a NewJob with defaults suitable for most tests
pub(crate) fn new_job(user_id: i64, provider_id: i64, key: &str, external_id: &str) -> NewJob {
    NewJob {
        user_id,
        provider_id,
        provider_key: key.to_string(),
        external_id: external_id.to_string(),
        title: format!("Title {external_id}"),
        category: Category::Movies,
        metadata: None,
        priority: 100,
    }
}

#[tokio::test]
async fn migrations_apply_once_and_are_idempotent() {
    let db = test_db().await;
    // Re-running against the same pool must be a no-op, not a failure
    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(version, 1, "schema must be at v1 after open");
}
