//! Extracted-fields persistence
//!
//! One row per submission; the structured fields are stored as a JSON
//! payload with the clearance type mirrored into its own column for
//! operational queries.

use crate::types::ExtractedFields;
use chrono::Utc;
use kasama_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Upsert the extracted fields for a submission
///
/// Re-extraction (e.g., after the sweeper re-runs a submission) replaces
/// the previous payload; user confirmations live inside the payload and
/// are preserved by the caller merging before saving.
pub async fn save_fields(
    pool: &SqlitePool,
    submission_guid: Uuid,
    fields: &ExtractedFields,
) -> Result<()> {
    let payload = serde_json::to_string(fields)
        .map_err(|e| Error::Internal(format!("Fields serialization: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO kyc_extracted_fields (submission_guid, clearance_type, fields, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(submission_guid) DO UPDATE SET
            clearance_type = excluded.clearance_type,
            fields = excluded.fields,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(submission_guid.to_string())
    .bind(fields.clearance_type.as_str())
    .bind(payload)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Load the extracted fields for a submission
pub async fn load_fields(
    pool: &SqlitePool,
    submission_guid: Uuid,
) -> Result<Option<ExtractedFields>> {
    let row = sqlx::query("SELECT fields FROM kyc_extracted_fields WHERE submission_guid = ?")
        .bind(submission_guid.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| {
        let payload: String = row.get("fields");
        serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("Fields parse: {}", e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::db::submissions::{create_submission, Submission};
    use crate::types::{ClearanceType, FieldValue, IdType, SubmissionKind};

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let pool = init_memory_pool().await.unwrap();
        let submission = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::PhilsysId);
        create_submission(&pool, &submission).await.unwrap();

        let mut fields = ExtractedFields::new();
        fields.last_name = FieldValue::extracted("Dela Cruz", 0.88);
        fields.birthdate = FieldValue::extracted("1990-01-15", 0.79);
        fields.clearance_type = ClearanceType::Nbi;

        save_fields(&pool, submission.guid, &fields).await.unwrap();
        let loaded = load_fields(&pool, submission.guid).await.unwrap().unwrap();

        assert_eq!(loaded.last_name.value.as_deref(), Some("Dela Cruz"));
        assert_eq!(loaded.last_name.confidence, Some(0.88));
        assert_eq!(loaded.clearance_type, ClearanceType::Nbi);
        // Unextracted field keeps its None confidence through persistence
        assert!(loaded.first_name.confidence.is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_payload() {
        let pool = init_memory_pool().await.unwrap();
        let submission = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::PhilsysId);
        create_submission(&pool, &submission).await.unwrap();

        let mut first = ExtractedFields::new();
        first.last_name = FieldValue::extracted("Garcia", 0.7);
        save_fields(&pool, submission.guid, &first).await.unwrap();

        let mut second = ExtractedFields::new();
        second.last_name = FieldValue::extracted("Garcia", 0.9);
        second.last_name.confirmed = Some("Garcia".to_string());
        save_fields(&pool, submission.guid, &second).await.unwrap();

        let loaded = load_fields(&pool, submission.guid).await.unwrap().unwrap();
        assert_eq!(loaded.last_name.confidence, Some(0.9));
        assert_eq!(loaded.last_name.confirmed.as_deref(), Some("Garcia"));
    }

    #[tokio::test]
    async fn test_missing_fields_row() {
        let pool = init_memory_pool().await.unwrap();
        assert!(load_fields(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }
}
