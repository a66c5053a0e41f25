//! Decision persistence
//!
//! **[KYC-DB-030]** A submission has at most one decision record. The
//! decision row, the submission status, the owner's verified flag, and the
//! audit entry are committed in a single transaction; there are no partial
//! writes. Re-committing an identical decision is a no-op, which is what
//! makes re-submission idempotent.

use crate::decision::Decision;
use crate::types::{DecisionOutcome, SubmissionStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kasama_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::{accounts, audit, submissions};

/// Load the decision record for a submission
pub async fn load_decision(pool: &SqlitePool, submission_guid: Uuid) -> Result<Option<Decision>> {
    let row = sqlx::query(
        r#"
        SELECT outcome, overall_confidence, face_match_similarity, rejection_message,
               reasons, applied_thresholds, decided_at
        FROM kyc_decisions WHERE submission_guid = ?
        "#,
    )
    .bind(submission_guid.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let outcome_str: String = row.get("outcome");
        let reasons_str: String = row.get("reasons");
        let thresholds_str: String = row.get("applied_thresholds");
        let decided_str: String = row.get("decided_at");

        Ok(Decision {
            outcome: DecisionOutcome::parse(&outcome_str)
                .map_err(|e| Error::Internal(e.to_string()))?,
            overall_confidence: row.get("overall_confidence"),
            face_match_similarity: row.get("face_match_similarity"),
            rejection_message: row.get("rejection_message"),
            reasons: serde_json::from_str(&reasons_str)
                .map_err(|e| Error::Internal(format!("Reasons parse: {}", e)))?,
            applied_thresholds: serde_json::from_str(&thresholds_str)
                .map_err(|e| Error::Internal(format!("Thresholds parse: {}", e)))?,
            decided_at: DateTime::parse_from_rfc3339(&decided_str)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| Error::Internal(format!("Bad timestamp: {}", e)))?,
        })
    })
    .transpose()
}

/// Insert the decision row; false when one already exists
async fn insert_decision_tx(
    tx: &mut Transaction<'_, Sqlite>,
    submission_guid: Uuid,
    decision: &Decision,
) -> Result<bool> {
    let reasons = serde_json::to_string(&decision.reasons)
        .map_err(|e| Error::Internal(format!("Reasons serialization: {}", e)))?;
    let thresholds = serde_json::to_string(&decision.applied_thresholds)
        .map_err(|e| Error::Internal(format!("Thresholds serialization: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO kyc_decisions
            (submission_guid, outcome, overall_confidence, face_match_similarity,
             rejection_message, reasons, applied_thresholds, decided_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(submission_guid) DO NOTHING
        "#,
    )
    .bind(submission_guid.to_string())
    .bind(decision.outcome.as_str())
    .bind(decision.overall_confidence)
    .bind(decision.face_match_similarity)
    .bind(&decision.rejection_message)
    .bind(reasons)
    .bind(thresholds)
    .bind(decision.decided_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Commit a decision atomically with all its side effects
///
/// In one transaction: the decision record, the submission status (and
/// decision timestamp on terminal outcomes), the owner's verified flag, the
/// rejection cooldown, and the audit entry. Returns false when a decision
/// already existed — callers skip notifications in that case.
pub async fn commit_decision(
    pool: &SqlitePool,
    submission_guid: Uuid,
    owner_guid: Uuid,
    decision: &Decision,
    retry_cooldown: Duration,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    if !insert_decision_tx(&mut tx, submission_guid, decision).await? {
        tx.rollback().await?;
        tracing::debug!(
            submission = %submission_guid,
            "Decision already recorded; skipping side effects"
        );
        return Ok(false);
    }

    let (status, decided_at, verified) = match decision.outcome {
        DecisionOutcome::AutoApproved => {
            (SubmissionStatus::Approved, Some(decision.decided_at), Some(true))
        }
        DecisionOutcome::AutoRejected => {
            (SubmissionStatus::Rejected, Some(decision.decided_at), Some(false))
        }
        DecisionOutcome::PendingHumanReview => (SubmissionStatus::UnderReview, None, None),
    };

    submissions::set_status_tx(&mut tx, submission_guid, status, decided_at).await?;

    if let Some(verified) = verified {
        accounts::set_verified_tx(&mut tx, owner_guid, verified).await?;
    }
    if decision.outcome == DecisionOutcome::AutoRejected {
        let cooldown = ChronoDuration::from_std(retry_cooldown)
            .map_err(|e| Error::Internal(format!("Cooldown out of range: {}", e)))?;
        accounts::set_retry_eligible_tx(&mut tx, owner_guid, decision.decided_at + cooldown)
            .await?;
    }

    audit::append_tx(
        &mut tx,
        submission_guid,
        owner_guid,
        decision.outcome.as_str(),
        &serde_json::json!({
            "overall_confidence": decision.overall_confidence,
            "face_match_similarity": decision.face_match_similarity,
            "reasons": decision.reasons,
        })
        .to_string(),
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::submissions::{create_submission, load_submission, Submission};
    use crate::db::{accounts, init_memory_pool};
    use crate::types::{IdType, SubmissionKind};

    fn decision(outcome: DecisionOutcome) -> Decision {
        Decision {
            outcome,
            overall_confidence: 0.93,
            face_match_similarity: Some(0.91),
            rejection_message: None,
            reasons: vec!["test".to_string()],
            applied_thresholds: serde_json::json!({"auto_approve_min_confidence": 0.90}),
            decided_at: Utc::now(),
        }
    }

    async fn setup() -> (SqlitePool, Submission) {
        let pool = init_memory_pool().await.unwrap();
        let owner = Uuid::new_v4();
        accounts::create_account(&pool, owner, SubmissionKind::Individual).await.unwrap();
        let submission = Submission::new(owner, SubmissionKind::Individual, IdType::PhilsysId);
        create_submission(&pool, &submission).await.unwrap();
        (pool, submission)
    }

    #[tokio::test]
    async fn test_approval_flips_verified_flag_atomically() {
        let (pool, submission) = setup().await;
        let inserted = commit_decision(
            &pool,
            submission.guid,
            submission.owner_guid,
            &decision(DecisionOutcome::AutoApproved),
            Duration::from_secs(86_400),
        )
        .await
        .unwrap();
        assert!(inserted);

        let stored = load_submission(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Approved);
        assert!(stored.decided_at.is_some());

        let account = accounts::get_account(&pool, submission.owner_guid)
            .await
            .unwrap()
            .unwrap();
        assert!(account.verified);
        assert!(account.retry_eligible_at.is_none());
    }

    #[tokio::test]
    async fn test_rejection_sets_cooldown_and_keeps_unverified() {
        let (pool, submission) = setup().await;
        let mut rejected = decision(DecisionOutcome::AutoRejected);
        rejected.rejection_message = Some("face mismatch".to_string());

        commit_decision(
            &pool,
            submission.guid,
            submission.owner_guid,
            &rejected,
            Duration::from_secs(86_400),
        )
        .await
        .unwrap();

        let stored = load_submission(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Rejected);

        let account = accounts::get_account(&pool, submission.owner_guid)
            .await
            .unwrap()
            .unwrap();
        assert!(!account.verified);
        let eligible = account.retry_eligible_at.unwrap();
        assert!(eligible > Utc::now() + ChronoDuration::hours(23));
    }

    #[tokio::test]
    async fn test_review_outcome_leaves_flag_untouched() {
        let (pool, submission) = setup().await;
        commit_decision(
            &pool,
            submission.guid,
            submission.owner_guid,
            &decision(DecisionOutcome::PendingHumanReview),
            Duration::from_secs(86_400),
        )
        .await
        .unwrap();

        let stored = load_submission(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::UnderReview);
        assert!(stored.decided_at.is_none());

        let account = accounts::get_account(&pool, submission.owner_guid)
            .await
            .unwrap()
            .unwrap();
        assert!(!account.verified);
    }

    #[tokio::test]
    async fn test_second_commit_is_a_no_op() {
        let (pool, submission) = setup().await;
        let first = commit_decision(
            &pool,
            submission.guid,
            submission.owner_guid,
            &decision(DecisionOutcome::AutoApproved),
            Duration::from_secs(86_400),
        )
        .await
        .unwrap();
        assert!(first);

        // A conflicting second decision never lands
        let second = commit_decision(
            &pool,
            submission.guid,
            submission.owner_guid,
            &decision(DecisionOutcome::AutoRejected),
            Duration::from_secs(86_400),
        )
        .await
        .unwrap();
        assert!(!second);

        let stored = load_decision(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(stored.outcome, DecisionOutcome::AutoApproved);
        let account = accounts::get_account(&pool, submission.owner_guid)
            .await
            .unwrap()
            .unwrap();
        assert!(account.verified);
    }

    #[tokio::test]
    async fn test_decision_round_trip() {
        let (pool, submission) = setup().await;
        let original = decision(DecisionOutcome::AutoApproved);
        commit_decision(
            &pool,
            submission.guid,
            submission.owner_guid,
            &original,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let loaded = load_decision(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(loaded.outcome, DecisionOutcome::AutoApproved);
        assert_eq!(loaded.overall_confidence, original.overall_confidence);
        assert_eq!(loaded.face_match_similarity, original.face_match_similarity);
        assert_eq!(loaded.reasons, original.reasons);
    }
}
