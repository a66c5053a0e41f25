//! Submission persistence
//!
//! **[KYC-DB-020]** A submission is the top-level unit; the partial unique
//! index on open submissions enforces at most one non-terminal submission
//! per owner, turning a concurrent re-submission into a typed conflict.

use crate::types::{IdType, SubmissionKind, SubmissionStatus};
use chrono::{DateTime, Utc};
use kasama_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

/// Submission record
#[derive(Debug, Clone)]
pub struct Submission {
    pub guid: Uuid,
    pub owner_guid: Uuid,
    pub kind: SubmissionKind,
    pub id_type: IdType,
    pub status: SubmissionStatus,
    pub fields_confirmed: bool,
    pub reviewer_guid: Option<Uuid>,
    pub reviewer_notes: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(owner_guid: Uuid, kind: SubmissionKind, id_type: IdType) -> Self {
        Self {
            guid: Uuid::new_v4(),
            owner_guid,
            kind,
            id_type,
            status: SubmissionStatus::Pending,
            fields_confirmed: false,
            reviewer_guid: None,
            reviewer_notes: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Insert a new submission
///
/// Returns `Error::Conflict` when the owner already has a non-terminal
/// submission (enforced by the partial unique index).
pub async fn create_submission(pool: &SqlitePool, submission: &Submission) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO kyc_submissions
            (guid, owner_guid, kind, id_type, status, fields_confirmed, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission.guid.to_string())
    .bind(submission.owner_guid.to_string())
    .bind(submission.kind.as_str())
    .bind(submission.id_type.as_str())
    .bind(submission.status.as_str())
    .bind(submission.fields_confirmed as i32)
    .bind(submission.created_at.to_rfc3339())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
            Error::Conflict("submission already pending for this owner".to_string()),
        ),
        Err(e) => Err(e.into()),
    }
}

/// Load a submission by guid
pub async fn load_submission(pool: &SqlitePool, guid: Uuid) -> Result<Option<Submission>> {
    let row = sqlx::query(
        r#"
        SELECT guid, owner_guid, kind, id_type, status, fields_confirmed,
               reviewer_guid, reviewer_notes, decided_at, created_at
        FROM kyc_submissions WHERE guid = ?
        "#,
    )
    .bind(guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(parse_submission).transpose()
}

/// The owner's current non-terminal submission, if any
pub async fn find_open_by_owner(pool: &SqlitePool, owner_guid: Uuid) -> Result<Option<Submission>> {
    let row = sqlx::query(
        r#"
        SELECT guid, owner_guid, kind, id_type, status, fields_confirmed,
               reviewer_guid, reviewer_notes, decided_at, created_at
        FROM kyc_submissions
        WHERE owner_guid = ? AND status IN ('PENDING', 'UNDER_REVIEW')
        "#,
    )
    .bind(owner_guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(parse_submission).transpose()
}

/// All submissions for an owner, newest first
pub async fn list_by_owner(pool: &SqlitePool, owner_guid: Uuid) -> Result<Vec<Submission>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, owner_guid, kind, id_type, status, fields_confirmed,
               reviewer_guid, reviewer_notes, decided_at, created_at
        FROM kyc_submissions
        WHERE owner_guid = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(owner_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(parse_submission).collect()
}

/// Non-terminal submissions with no decision record, for the sweeper
///
/// UNDER_REVIEW submissions that carry a decision row are parked for
/// human review, not stranded, and are excluded.
pub async fn list_undecided(pool: &SqlitePool) -> Result<Vec<Submission>> {
    let rows = sqlx::query(
        r#"
        SELECT s.guid, s.owner_guid, s.kind, s.id_type, s.status, s.fields_confirmed,
               s.reviewer_guid, s.reviewer_notes, s.decided_at, s.created_at
        FROM kyc_submissions s
        LEFT JOIN kyc_decisions d ON d.submission_guid = s.guid
        WHERE s.status IN ('PENDING', 'UNDER_REVIEW') AND d.submission_guid IS NULL
        ORDER BY s.created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(parse_submission).collect()
}

/// Update submission status (non-transactional path)
pub async fn set_status(pool: &SqlitePool, guid: Uuid, status: SubmissionStatus) -> Result<()> {
    sqlx::query("UPDATE kyc_submissions SET status = ? WHERE guid = ?")
        .bind(status.as_str())
        .bind(guid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Update status and decision timestamp inside the decision transaction
pub async fn set_status_tx(
    tx: &mut Transaction<'_, Sqlite>,
    guid: Uuid,
    status: SubmissionStatus,
    decided_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("UPDATE kyc_submissions SET status = ?, decided_at = ? WHERE guid = ?")
        .bind(status.as_str())
        .bind(decided_at.map(|d| d.to_rfc3339()))
        .bind(guid.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Record the user confirming their extracted fields
pub async fn set_fields_confirmed(pool: &SqlitePool, guid: Uuid, confirmed: bool) -> Result<()> {
    sqlx::query("UPDATE kyc_submissions SET fields_confirmed = ? WHERE guid = ?")
        .bind(confirmed as i32)
        .bind(guid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a human reviewer's identity and notes
pub async fn set_reviewer(
    pool: &SqlitePool,
    guid: Uuid,
    reviewer_guid: Uuid,
    notes: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE kyc_submissions SET reviewer_guid = ?, reviewer_notes = ? WHERE guid = ?")
        .bind(reviewer_guid.to_string())
        .bind(notes)
        .bind(guid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn parse_submission(row: sqlx::sqlite::SqliteRow) -> Result<Submission> {
    let parse_uuid = |s: String| {
        Uuid::parse_str(&s).map_err(|e| Error::Internal(format!("Bad guid: {}", e)))
    };
    let parse_time = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| Error::Internal(format!("Bad timestamp: {}", e)))
    };

    let kind_str: String = row.get("kind");
    let id_type_str: String = row.get("id_type");
    let status_str: String = row.get("status");
    let fields_confirmed: i32 = row.get("fields_confirmed");
    let reviewer: Option<String> = row.get("reviewer_guid");
    let decided: Option<String> = row.get("decided_at");

    Ok(Submission {
        guid: parse_uuid(row.get("guid"))?,
        owner_guid: parse_uuid(row.get("owner_guid"))?,
        kind: SubmissionKind::parse(&kind_str).map_err(|e| Error::Internal(e.to_string()))?,
        id_type: IdType::parse(&id_type_str).map_err(|e| Error::Internal(e.to_string()))?,
        status: SubmissionStatus::parse(&status_str)
            .map_err(|e| Error::Internal(e.to_string()))?,
        fields_confirmed: fields_confirmed != 0,
        reviewer_guid: reviewer.map(parse_uuid).transpose()?,
        reviewer_notes: row.get("reviewer_notes"),
        decided_at: decided.map(parse_time).transpose()?,
        created_at: parse_time(row.get("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_create_and_load_round_trip() {
        let pool = init_memory_pool().await.unwrap();
        let submission = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::PhilsysId);

        create_submission(&pool, &submission).await.unwrap();
        let loaded = load_submission(&pool, submission.guid).await.unwrap().unwrap();

        assert_eq!(loaded.guid, submission.guid);
        assert_eq!(loaded.owner_guid, submission.owner_guid);
        assert_eq!(loaded.kind, SubmissionKind::Individual);
        assert_eq!(loaded.id_type, IdType::PhilsysId);
        assert_eq!(loaded.status, SubmissionStatus::Pending);
        assert!(!loaded.fields_confirmed);
    }

    #[tokio::test]
    async fn test_second_open_submission_conflicts() {
        let pool = init_memory_pool().await.unwrap();
        let owner = Uuid::new_v4();

        let first = Submission::new(owner, SubmissionKind::Individual, IdType::NationalId);
        create_submission(&pool, &first).await.unwrap();

        let second = Submission::new(owner, SubmissionKind::Individual, IdType::NationalId);
        let result = create_submission(&pool, &second).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_terminal_submission_allows_new_one() {
        let pool = init_memory_pool().await.unwrap();
        let owner = Uuid::new_v4();

        let first = Submission::new(owner, SubmissionKind::Individual, IdType::NationalId);
        create_submission(&pool, &first).await.unwrap();
        set_status(&pool, first.guid, SubmissionStatus::Rejected).await.unwrap();

        let second = Submission::new(owner, SubmissionKind::Individual, IdType::NationalId);
        create_submission(&pool, &second).await.unwrap();

        let open = find_open_by_owner(&pool, owner).await.unwrap().unwrap();
        assert_eq!(open.guid, second.guid);
    }

    #[tokio::test]
    async fn test_list_undecided_for_sweeper() {
        let pool = init_memory_pool().await.unwrap();
        let a = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::Passport);
        let b = Submission::new(Uuid::new_v4(), SubmissionKind::Agency, IdType::BusinessPermit);
        let c = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::Passport);
        create_submission(&pool, &a).await.unwrap();
        create_submission(&pool, &b).await.unwrap();
        create_submission(&pool, &c).await.unwrap();

        // Stranded in UNDER_REVIEW without a decision row: still swept
        set_status(&pool, b.guid, SubmissionStatus::UnderReview).await.unwrap();
        // Terminal: never swept
        set_status(&pool, c.guid, SubmissionStatus::Rejected).await.unwrap();

        let undecided = list_undecided(&pool).await.unwrap();
        let guids: Vec<Uuid> = undecided.iter().map(|s| s.guid).collect();
        assert!(guids.contains(&a.guid));
        assert!(guids.contains(&b.guid));
        assert!(!guids.contains(&c.guid));
    }

    #[tokio::test]
    async fn test_set_status_with_decision_timestamp() {
        let pool = init_memory_pool().await.unwrap();
        let submission = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::Passport);
        create_submission(&pool, &submission).await.unwrap();

        let decided_at = Utc::now();
        let mut tx = pool.begin().await.unwrap();
        set_status_tx(&mut tx, submission.guid, SubmissionStatus::Approved, Some(decided_at))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let loaded = load_submission(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(loaded.status, SubmissionStatus::Approved);
        assert!(loaded.decided_at.is_some());
    }
}
