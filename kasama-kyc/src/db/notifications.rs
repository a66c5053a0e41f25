//! Notification persistence
//!
//! **[KYC-NT-010]** Notifications are written after the decision
//! transaction commits, at-least-once. The UNIQUE(submission, kind)
//! constraint is the idempotency key: re-delivery attempts insert nothing
//! and emit nothing.

use chrono::{DateTime, Utc};
use kasama_common::events::NotificationKind;
use kasama_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Persisted notification
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: i64,
    pub owner_guid: Uuid,
    pub submission_guid: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub retry_eligible_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert a notification; false when one already exists for this
/// (submission, kind) pair
pub async fn insert_unique(
    pool: &SqlitePool,
    owner_guid: Uuid,
    submission_guid: Uuid,
    kind: NotificationKind,
    message: &str,
    retry_eligible_at: Option<DateTime<Utc>>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications
            (owner_guid, submission_guid, kind, message, retry_eligible_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(submission_guid, kind) DO NOTHING
        "#,
    )
    .bind(owner_guid.to_string())
    .bind(submission_guid.to_string())
    .bind(kind.as_str())
    .bind(message)
    .bind(retry_eligible_at.map(|d| d.to_rfc3339()))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Notifications for an owner, newest first
pub async fn list_for_owner(pool: &SqlitePool, owner_guid: Uuid) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_guid, submission_guid, kind, message, retry_eligible_at, created_at
        FROM notifications
        WHERE owner_guid = ?
        ORDER BY id DESC
        "#,
    )
    .bind(owner_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let owner_str: String = row.get("owner_guid");
            let submission_str: String = row.get("submission_guid");
            let kind_str: String = row.get("kind");
            let retry_str: Option<String> = row.get("retry_eligible_at");
            let created_str: String = row.get("created_at");

            Ok(Notification {
                id: row.get("id"),
                owner_guid: Uuid::parse_str(&owner_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                submission_guid: Uuid::parse_str(&submission_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                kind: NotificationKind::parse(&kind_str)
                    .ok_or_else(|| Error::Internal(format!("Unknown kind: {}", kind_str)))?,
                message: row.get("message"),
                retry_eligible_at: retry_str
                    .map(|s| {
                        DateTime::parse_from_rfc3339(&s)
                            .map(|d| d.with_timezone(&Utc))
                            .map_err(|e| Error::Internal(format!("Bad timestamp: {}", e)))
                    })
                    .transpose()?,
                created_at: DateTime::parse_from_rfc3339(&created_str)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| Error::Internal(format!("Bad timestamp: {}", e)))?,
            })
        })
        .collect()
}
