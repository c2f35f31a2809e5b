//! Append-only audit trail.

use crate::error::Result;

use super::{Database, AuditRow, map_db_err};

impl Database {
    /// Append an audit record
    pub async fn insert_audit(
        &self,
        actor: &str,
        action: &str,
        subject_type: &str,
        subject_id: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor, action, subject_type, subject_id, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(actor)
        .bind(action)
        .bind(subject_type)
        .bind(subject_id)
        .bind(payload.map(|p| p.to_string()))
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to insert audit record", e))?;

        Ok(())
    }

    /// Most recent audit records, newest first
    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditRow>> {
        sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, actor, action, subject_type, subject_id, payload, created_at
            FROM audit_log ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_err("Failed to list audit records", e))
    }
}
