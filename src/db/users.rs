//! User rows and session token lookup.

use crate::error::Result;

use super::{Database, UserRow, map_db_err};

impl Database {
    /// Insert a user, returning its id
    pub async fn insert_user(
        &self,
        username: &str,
        role: &str,
        session_token: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO users (username, role, session_token, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(role)
        .bind(session_token)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to insert user", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Resolve a session token to a user, for API authentication
    pub async fn find_user_by_token(&self, token: &str) -> Result<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, role, session_token, created_at
            FROM users WHERE session_token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to look up session token", e))
    }

    /// Get a user by id
    pub async fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, role, session_token, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to get user", e))
    }
}
