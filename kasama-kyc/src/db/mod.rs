//! Database access for kasama-kyc
//!
//! **[KYC-DB-010]** Shared SQLite database access. Closed enums are stored
//! as TEXT; structured payloads (warnings, reasons, extracted fields) as
//! JSON TEXT. Analyses and decisions are immutable once written.

pub mod accounts;
pub mod analyses;
pub mod audit;
pub mod decisions;
pub mod documents;
pub mod fields;
pub mod notifications;
pub mod submissions;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to the shared kasama.db in the root folder.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests and local tooling
///
/// Capped at one connection: each sqlite :memory: connection is otherwise
/// its own database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Initialize kasama-kyc tables
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            guid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            retry_eligible_at TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kyc_submissions (
            guid TEXT PRIMARY KEY,
            owner_guid TEXT NOT NULL,
            kind TEXT NOT NULL,
            id_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            fields_confirmed INTEGER NOT NULL DEFAULT 0,
            reviewer_guid TEXT,
            reviewer_notes TEXT,
            decided_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One non-terminal submission per owner at any time
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_one_open_per_owner
        ON kyc_submissions(owner_guid)
        WHERE status IN ('PENDING', 'UNDER_REVIEW')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kyc_documents (
            guid TEXT PRIMARY KEY,
            submission_guid TEXT NOT NULL REFERENCES kyc_submissions(guid) ON DELETE CASCADE,
            role TEXT NOT NULL,
            bucket TEXT NOT NULL,
            path TEXT NOT NULL,
            mime_type TEXT,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            uploaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kyc_analyses (
            document_guid TEXT PRIMARY KEY REFERENCES kyc_documents(guid) ON DELETE CASCADE,
            submission_guid TEXT NOT NULL REFERENCES kyc_submissions(guid) ON DELETE CASCADE,
            status TEXT NOT NULL,
            face_detected INTEGER,
            face_count INTEGER NOT NULL DEFAULT 0,
            face_confidence REAL NOT NULL DEFAULT 0.0,
            ocr_text TEXT NOT NULL DEFAULT '',
            ocr_confidence REAL NOT NULL DEFAULT 0.0,
            quality_score REAL NOT NULL DEFAULT 0.0,
            ai_confidence REAL NOT NULL DEFAULT 0.0,
            rejection_reason TEXT,
            rejection_message TEXT,
            warnings TEXT NOT NULL DEFAULT '[]',
            details TEXT NOT NULL DEFAULT '{}',
            verified_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kyc_extracted_fields (
            submission_guid TEXT PRIMARY KEY REFERENCES kyc_submissions(guid) ON DELETE CASCADE,
            clearance_type TEXT NOT NULL DEFAULT 'NONE',
            fields TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kyc_decisions (
            submission_guid TEXT PRIMARY KEY REFERENCES kyc_submissions(guid) ON DELETE CASCADE,
            outcome TEXT NOT NULL,
            overall_confidence REAL NOT NULL,
            face_match_similarity REAL,
            rejection_message TEXT,
            reasons TEXT NOT NULL DEFAULT '[]',
            applied_thresholds TEXT NOT NULL DEFAULT '{}',
            decided_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only; rows are never updated or deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kyc_audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_guid TEXT NOT NULL,
            owner_guid TEXT NOT NULL,
            action TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Idempotency key: one notification per (submission, kind)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_guid TEXT NOT NULL,
            submission_guid TEXT NOT NULL,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            retry_eligible_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(submission_guid, kind)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (accounts, kyc_*, notifications)");

    Ok(())
}
