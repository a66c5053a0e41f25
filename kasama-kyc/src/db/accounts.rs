//! Owner account operations
//!
//! The accounts table is the consumed owner-accounts collaborator: the
//! pipeline reads owners and flips their verified flag inside the decision
//! transaction.

use crate::types::SubmissionKind;
use chrono::{DateTime, Utc};
use kasama_common::Result;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Owner account record
#[derive(Debug, Clone)]
pub struct Account {
    pub guid: Uuid,
    pub kind: SubmissionKind,
    pub verified: bool,
    pub retry_eligible_at: Option<DateTime<Utc>>,
}

/// Create an account (idempotent on guid)
pub async fn create_account(pool: &SqlitePool, guid: Uuid, kind: SubmissionKind) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO accounts (guid, kind, verified, created_at, updated_at)
        VALUES (?, ?, 0, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(guid) DO NOTHING
        "#,
    )
    .bind(guid.to_string())
    .bind(kind.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Load an account by guid
pub async fn get_account(pool: &SqlitePool, guid: Uuid) -> Result<Option<Account>> {
    let row = sqlx::query(
        "SELECT guid, kind, verified, retry_eligible_at FROM accounts WHERE guid = ?",
    )
    .bind(guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(parse_account).transpose()
}

/// List every account (operational tooling)
pub async fn list_accounts(pool: &SqlitePool) -> Result<Vec<Account>> {
    let rows = sqlx::query("SELECT guid, kind, verified, retry_eligible_at FROM accounts")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(parse_account).collect()
}

/// Flip the verified flag inside the decision transaction
pub async fn set_verified_tx(
    tx: &mut Transaction<'_, Sqlite>,
    guid: Uuid,
    verified: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE accounts SET verified = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(verified as i32)
    .bind(guid.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Record the retry cooldown inside the decision transaction
pub async fn set_retry_eligible_tx(
    tx: &mut Transaction<'_, Sqlite>,
    guid: Uuid,
    retry_eligible_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE accounts SET retry_eligible_at = ?, updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
    )
    .bind(retry_eligible_at.to_rfc3339())
    .bind(guid.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_account(row: sqlx::sqlite::SqliteRow) -> Result<Account> {
    let guid_str: String = row.get("guid");
    let kind_str: String = row.get("kind");
    let verified: i32 = row.get("verified");
    let retry_str: Option<String> = row.get("retry_eligible_at");

    let retry_eligible_at = retry_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| kasama_common::Error::Internal(format!("Bad timestamp: {}", e)))
        })
        .transpose()?;

    Ok(Account {
        guid: Uuid::parse_str(&guid_str)
            .map_err(|e| kasama_common::Error::Internal(format!("Bad account guid: {}", e)))?,
        kind: SubmissionKind::parse(&kind_str)
            .map_err(|e| kasama_common::Error::Internal(e.to_string()))?,
        verified: verified != 0,
        retry_eligible_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_create_and_get_account() {
        let pool = init_memory_pool().await.unwrap();
        let guid = Uuid::new_v4();

        create_account(&pool, guid, SubmissionKind::Individual).await.unwrap();
        let account = get_account(&pool, guid).await.unwrap().unwrap();

        assert_eq!(account.guid, guid);
        assert_eq!(account.kind, SubmissionKind::Individual);
        assert!(!account.verified);
        assert!(account.retry_eligible_at.is_none());
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let pool = init_memory_pool().await.unwrap();
        let guid = Uuid::new_v4();
        create_account(&pool, guid, SubmissionKind::Agency).await.unwrap();
        create_account(&pool, guid, SubmissionKind::Agency).await.unwrap();
        assert_eq!(list_accounts(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_verified_in_transaction() {
        let pool = init_memory_pool().await.unwrap();
        let guid = Uuid::new_v4();
        create_account(&pool, guid, SubmissionKind::Individual).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        set_verified_tx(&mut tx, guid, true).await.unwrap();
        tx.commit().await.unwrap();

        assert!(get_account(&pool, guid).await.unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_rolled_back_flag_change_is_invisible() {
        let pool = init_memory_pool().await.unwrap();
        let guid = Uuid::new_v4();
        create_account(&pool, guid, SubmissionKind::Individual).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        set_verified_tx(&mut tx, guid, true).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!get_account(&pool, guid).await.unwrap().unwrap().verified);
    }
}
