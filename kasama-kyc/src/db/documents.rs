//! Document persistence
//!
//! Documents are created once and never mutated; they belong exclusively to
//! their submission and are deleted by cascade with it.

use crate::types::DocumentRole;
use chrono::{DateTime, Utc};
use kasama_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Uploaded document record
#[derive(Debug, Clone)]
pub struct Document {
    pub guid: Uuid,
    pub submission_guid: Uuid,
    pub role: DocumentRole,
    pub bucket: String,
    pub path: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        submission_guid: Uuid,
        role: DocumentRole,
        bucket: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            submission_guid,
            role,
            bucket: bucket.into(),
            path: path.into(),
            mime_type: None,
            size_bytes: 0,
            uploaded_at: Utc::now(),
        }
    }
}

/// Save a document record
pub async fn save_document(pool: &SqlitePool, document: &Document) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kyc_documents
            (guid, submission_guid, role, bucket, path, mime_type, size_bytes, uploaded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(document.guid.to_string())
    .bind(document.submission_guid.to_string())
    .bind(document.role.as_str())
    .bind(&document.bucket)
    .bind(&document.path)
    .bind(&document.mime_type)
    .bind(document.size_bytes)
    .bind(document.uploaded_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// All documents of a submission, in upload order
pub async fn load_documents(pool: &SqlitePool, submission_guid: Uuid) -> Result<Vec<Document>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, submission_guid, role, bucket, path, mime_type, size_bytes, uploaded_at
        FROM kyc_documents
        WHERE submission_guid = ?
        ORDER BY uploaded_at ASC, guid ASC
        "#,
    )
    .bind(submission_guid.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let role_str: String = row.get("role");
            let guid_str: String = row.get("guid");
            let submission_str: String = row.get("submission_guid");
            let uploaded_str: String = row.get("uploaded_at");

            Ok(Document {
                guid: Uuid::parse_str(&guid_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                submission_guid: Uuid::parse_str(&submission_str)
                    .map_err(|e| Error::Internal(format!("Bad guid: {}", e)))?,
                role: DocumentRole::parse(&role_str)
                    .map_err(|e| Error::Internal(e.to_string()))?,
                bucket: row.get("bucket"),
                path: row.get("path"),
                mime_type: row.get("mime_type"),
                size_bytes: row.get("size_bytes"),
                uploaded_at: DateTime::parse_from_rfc3339(&uploaded_str)
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
    use crate::db::submissions::{create_submission, Submission};
    use crate::types::{IdType, SubmissionKind};

    #[tokio::test]
    async fn test_save_and_load_documents() {
        let pool = init_memory_pool().await.unwrap();
        let submission = Submission::new(Uuid::new_v4(), SubmissionKind::Individual, IdType::PhilsysId);
        create_submission(&pool, &submission).await.unwrap();

        let mut front = Document::new(
            submission.guid,
            DocumentRole::IdFront,
            "kyc-docs",
            "user_1/kyc/id_front_1700000000.jpg",
        );
        front.mime_type = Some("image/jpeg".to_string());
        front.size_bytes = 204_800;
        save_document(&pool, &front).await.unwrap();

        let selfie = Document::new(
            submission.guid,
            DocumentRole::Selfie,
            "kyc-docs",
            "user_1/kyc/selfie_1700000001.jpg",
        );
        save_document(&pool, &selfie).await.unwrap();

        let docs = load_documents(&pool, submission.guid).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].role, DocumentRole::IdFront);
        assert_eq!(docs[0].mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(docs[1].role, DocumentRole::Selfie);
    }

    #[tokio::test]
    async fn test_documents_empty_for_unknown_submission() {
        let pool = init_memory_pool().await.unwrap();
        let docs = load_documents(&pool, Uuid::new_v4()).await.unwrap();
        assert!(docs.is_empty());
    }
}
