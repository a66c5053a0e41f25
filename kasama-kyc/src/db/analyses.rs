//! Analysis persistence
//!
//! One immutable analysis row per document. The insert is idempotent:
//! re-running a submission never overwrites an existing analysis.

use crate::types::{Analysis, DocumentRole, RejectionReason, VerificationStatus};
use chrono::{DateTime, Utc};
use kasama_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Save an analysis for a document; a no-op when one already exists
pub async fn save_analysis(
    pool: &SqlitePool,
    document_guid: Uuid,
    submission_guid: Uuid,
    analysis: &Analysis,
) -> Result<()> {
    let warnings = serde_json::to_string(&analysis.warnings)
        .map_err(|e| Error::Internal(format!("Warnings serialization: {}", e)))?;
    let details = serde_json::to_string(&analysis.details)
        .map_err(|e| Error::Internal(format!("Details serialization: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO kyc_analyses
            (document_guid, submission_guid, status, face_detected, face_count,
             face_confidence, ocr_text, ocr_confidence, quality_score, ai_confidence,
             rejection_reason, rejection_message, warnings, details, verified_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(document_guid) DO NOTHING
        "#,
    )
    .bind(document_guid.to_string())
    .bind(submission_guid.to_string())
    .bind(analysis.status.as_str())
    .bind(analysis.face_detected.map(|b| b as i32))
    .bind(analysis.face_count as i64)
    .bind(analysis.face_confidence)
    .bind(&analysis.ocr_text)
    .bind(analysis.ocr_confidence)
    .bind(analysis.quality_score)
    .bind(analysis.ai_confidence)
    .bind(analysis.rejection_reason.map(|r| r.as_str()))
    .bind(&analysis.rejection_message)
    .bind(warnings)
    .bind(details)
    .bind(analysis.verified_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// All analyses of a submission, keyed by document role
pub async fn load_analyses(
    pool: &SqlitePool,
    submission_guid: Uuid,
) -> Result<Vec<(Uuid, DocumentRole, Analysis)>> {
    let rows = sqlx::query(
        r#"
        SELECT a.document_guid, d.role, a.status, a.face_detected, a.face_count,
               a.face_confidence, a.ocr_text, a.ocr_confidence, a.quality_score,
               a.ai_confidence, a.rejection_reason, a.rejection_message,
               a.warnings, a.details, a.verified_at
        FROM kyc_analyses a
        JOIN kyc_documents d ON d.guid = a.document_guid
        WHERE a.submission_guid = ?
        ORDER BY d.uploaded_at ASC
        "#,
    )
    .bind(submission_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let document_str: String = row.get("document_guid");
            let role_str: String = row.get("role");
            let status_str: String = row.get("status");
            let reason_str: Option<String> = row.get("rejection_reason");
            let warnings_str: String = row.get("warnings");
            let details_str: String = row.get("details");
            let verified_str: String = row.get("verified_at");
            let face_detected: Option<i32> = row.get("face_detected");
            let face_count: i64 = row.get("face_count");

            let analysis = Analysis {
                status: VerificationStatus::parse(&status_str)
                    .map_err(|e| Error::Internal(e.to_string()))?,
                face_detected: face_detected.map(|v| v != 0),
                face_count: face_count as u32,
                face_confidence: row.get("face_confidence"),
                ocr_text: row.get("ocr_text"),
                ocr_confidence: row.get("ocr_confidence"),
                quality_score: row.get("quality_score"),
                ai_confidence: row.get("ai_confidence"),
                rejection_reason: reason_str
                    .map(|s| RejectionReason::parse(&s))
                    .transpose()
                    .map_err(|e| Error::Internal(e.to_string()))?,
                rejection_message: row.get("rejection_message"),
                warnings: serde_json::from_str(&warnings_str)
                    .map_err(|e| Error::Internal(format!("Warnings parse: {}", e)))?,
                details: serde_json::from_str(&details_str)
                    .map_err(|e| Error::Internal(format!("Details parse: {}", e)))?,
                verified_at: DateTime::parse_from_rfc3339(&verified_str)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| Error::Internal(format!("Bad timestamp: {}", e)))?,
            };

            Ok((
                Uuid::parse_str(&document_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                DocumentRole::parse(&role_str).map_err(|e| Error::Internal(e.to_string()))?,
                analysis,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::documents::{save_document, Document};
    use crate::db::init_memory_pool;
    use crate::db::submissions::{create_submission, Submission};
    use crate::types::{IdType, SubmissionKind};

    fn sample_analysis() -> Analysis {
        Analysis {
            status: VerificationStatus::Passed,
            face_detected: Some(true),
            face_count: 1,
            face_confidence: 0.92,
            ocr_text: "SURNAME: DELA CRUZ".to_string(),
            ocr_confidence: 0.88,
            quality_score: 0.82,
            ai_confidence: 0.89,
            rejection_reason: None,
            rejection_message: None,
            warnings: vec!["minor glare".to_string()],
            details: serde_json::json!({"blur_score": 0.9}),
            verified_at: Utc::now(),
        }
    }

    async fn setup() -> (SqlitePool, Uuid, Uuid) {
        let pool = init_memory_pool().await.unwrap();
        let submission = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::PhilsysId);
        create_submission(&pool, &submission).await.unwrap();
        let document = Document::new(submission.guid, DocumentRole::IdFront, "kyc-docs", "p.jpg");
        save_document(&pool, &document).await.unwrap();
        (pool, submission.guid, document.guid)
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let (pool, submission_guid, document_guid) = setup().await;
        let analysis = sample_analysis();

        save_analysis(&pool, document_guid, submission_guid, &analysis).await.unwrap();
        let loaded = load_analyses(&pool, submission_guid).await.unwrap();

        assert_eq!(loaded.len(), 1);
        let (doc_guid, role, stored) = &loaded[0];
        assert_eq!(*doc_guid, document_guid);
        assert_eq!(*role, DocumentRole::IdFront);
        assert_eq!(stored.status, VerificationStatus::Passed);
        assert_eq!(stored.face_detected, Some(true));
        assert_eq!(stored.warnings, vec!["minor glare".to_string()]);
        assert_eq!(stored.details["blur_score"], 0.9);
    }

    #[tokio::test]
    async fn test_analysis_is_immutable_once_written() {
        let (pool, submission_guid, document_guid) = setup().await;
        save_analysis(&pool, document_guid, submission_guid, &sample_analysis()).await.unwrap();

        // A second write with different content is silently ignored
        let mut second = sample_analysis();
        second.status = VerificationStatus::Failed;
        second.ai_confidence = 0.1;
        save_analysis(&pool, document_guid, submission_guid, &second).await.unwrap();

        let loaded = load_analyses(&pool, submission_guid).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].2.status, VerificationStatus::Passed);
    }
}
