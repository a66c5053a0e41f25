//! Append-only audit log
//!
//! One row per decision or reviewer action; rows are never updated or
//! deleted.

use chrono::{DateTime, Utc};
use kasama_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Audit log entry
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub submission_guid: Uuid,
    pub owner_guid: Uuid,
    pub action: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

/// Append an entry inside the decision transaction
pub async fn append_tx(
    tx: &mut Transaction<'_, Sqlite>,
    submission_guid: Uuid,
    owner_guid: Uuid,
    action: &str,
    detail: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kyc_audit_log (submission_guid, owner_guid, action, detail, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission_guid.to_string())
    .bind(owner_guid.to_string())
    .bind(action)
    .bind(detail)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Entries for one submission, oldest first
pub async fn list_for_submission(
    pool: &SqlitePool,
    submission_guid: Uuid,
) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, submission_guid, owner_guid, action, detail, created_at
        FROM kyc_audit_log
        WHERE submission_guid = ?
        ORDER BY id ASC
        "#,
    )
    .bind(submission_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let submission_str: String = row.get("submission_guid");
            let owner_str: String = row.get("owner_guid");
            let created_str: String = row.get("created_at");
            Ok(AuditEntry {
                id: row.get("id"),
                submission_guid: Uuid::parse_str(&submission_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                owner_guid: Uuid::parse_str(&owner_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                action: row.get("action"),
                detail: row.get("detail"),
                created_at: DateTime::parse_from_rfc3339(&created_str)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| Error::Internal(format!("Bad timestamp: {}", e)))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_append_and_list() {
        let pool = init_memory_pool().await.unwrap();
        let submission = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let mut tx = pool.begin().await.unwrap();
        append_tx(&mut tx, submission, owner, "AUTO_APPROVED", "{}").await.unwrap();
        append_tx(&mut tx, submission, owner, "REVIEWED", "manual check").await.unwrap();
        tx.commit().await.unwrap();

        let entries = list_for_submission(&pool, submission).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "AUTO_APPROVED");
        assert_eq!(entries[1].action, "REVIEWED");
        assert!(entries[0].id < entries[1].id);
    }
}
