//! Submission intake and status endpoints

use crate::db::{analyses, decisions, documents, fields, submissions};
use crate::error::{ApiError, ApiResult};
use crate::orchestrator::{DocumentUpload, SubmissionRequest};
use crate::types::{DocumentRole, IdType, SubmissionKind};
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub fn submission_routes() -> Router<AppState> {
    Router::new()
        .route("/kyc/submissions", post(create_submission))
        .route("/kyc/submissions/:id", get(get_submission))
        .route("/kyc/submissions/:id/decision", get(get_decision))
        .route("/kyc/submissions/:id/fields", get(get_fields))
        .route("/kyc/submissions/:id/confirm-fields", post(confirm_fields))
}

#[derive(Debug, Deserialize)]
struct DocumentPayload {
    role: String,
    bucket: String,
    path: String,
    mime_type: Option<String>,
    #[serde(default)]
    size_bytes: i64,
}

#[derive(Debug, Deserialize)]
struct SubmitPayload {
    owner_id: Uuid,
    kind: String,
    id_type: String,
    #[serde(default)]
    fields_confirmed: bool,
    documents: Vec<DocumentPayload>,
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    submission_id: Uuid,
    outcome: String,
    overall_confidence: f64,
    face_match_similarity: Option<f64>,
    rejection_message: Option<String>,
    documents: Vec<serde_json::Value>,
}

/// POST /kyc/submissions
///
/// Accepts storage references plus declared metadata and runs the full
/// pipeline. 409 when the owner already has a non-terminal submission or an
/// active retry cooldown.
async fn create_submission(
    State(state): State<AppState>,
    Json(payload): Json<SubmitPayload>,
) -> ApiResult<Json<SummaryResponse>> {
    let kind = SubmissionKind::parse(&payload.kind)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let id_type =
        IdType::parse(&payload.id_type).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut uploads = Vec::with_capacity(payload.documents.len());
    for doc in payload.documents {
        uploads.push(DocumentUpload {
            role: DocumentRole::parse(&doc.role)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            bucket: doc.bucket,
            path: doc.path,
            mime_type: doc.mime_type,
            size_bytes: doc.size_bytes,
        });
    }

    let summary = state
        .orchestrator
        .submit(SubmissionRequest {
            owner_id: payload.owner_id,
            kind,
            id_type,
            documents: uploads,
            fields_confirmed: payload.fields_confirmed,
        })
        .await?;

    Ok(Json(SummaryResponse {
        submission_id: summary.submission_id,
        outcome: summary.outcome.as_str().to_string(),
        overall_confidence: summary.overall_confidence,
        face_match_similarity: summary.face_match_similarity,
        rejection_message: summary.rejection_message,
        documents: summary
            .document_statuses
            .iter()
            .map(|(role, status)| json!({ "role": role.as_str(), "status": status.as_str() }))
            .collect(),
    }))
}

/// GET /kyc/submissions/:id
async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let submission = submissions::load_submission(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("submission {}", id)))?;
    let docs = documents::load_documents(&state.db, id).await?;
    let stored_analyses = analyses::load_analyses(&state.db, id).await?;

    let docs_json: Vec<serde_json::Value> = docs
        .iter()
        .map(|d| {
            let analysis = stored_analyses
                .iter()
                .find(|(doc_guid, _, _)| *doc_guid == d.guid)
                .map(|(_, _, a)| {
                    json!({
                        "status": a.status.as_str(),
                        "face_count": a.face_count,
                        "face_confidence": a.face_confidence,
                        "ocr_confidence": a.ocr_confidence,
                        "quality_score": a.quality_score,
                        "ai_confidence": a.ai_confidence,
                        "rejection_reason": a.rejection_reason.map(|r| r.as_str()),
                        "rejection_message": a.rejection_message,
                        "warnings": a.warnings,
                        "verified_at": a.verified_at.to_rfc3339(),
                    })
                });
            json!({
                "id": d.guid,
                "role": d.role.as_str(),
                "bucket": d.bucket,
                "path": d.path,
                "mime_type": d.mime_type,
                "size_bytes": d.size_bytes,
                "uploaded_at": d.uploaded_at.to_rfc3339(),
                "analysis": analysis,
            })
        })
        .collect();

    Ok(Json(json!({
        "id": submission.guid,
        "owner_id": submission.owner_guid,
        "kind": submission.kind.as_str(),
        "id_type": submission.id_type.as_str(),
        "status": submission.status.as_str(),
        "fields_confirmed": submission.fields_confirmed,
        "reviewer_id": submission.reviewer_guid,
        "reviewer_notes": submission.reviewer_notes,
        "decided_at": submission.decided_at.map(|d| d.to_rfc3339()),
        "created_at": submission.created_at.to_rfc3339(),
        "documents": docs_json,
    })))
}

/// GET /kyc/submissions/:id/decision
async fn get_decision(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let decision = decisions::load_decision(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("decision for submission {}", id)))?;

    Ok(Json(json!({
        "submission_id": id,
        "outcome": decision.outcome.as_str(),
        "overall_confidence": decision.overall_confidence,
        "face_match_similarity": decision.face_match_similarity,
        "rejection_message": decision.rejection_message,
        "reasons": decision.reasons,
        "applied_thresholds": decision.applied_thresholds,
        "decided_at": decision.decided_at.to_rfc3339(),
    })))
}

/// GET /kyc/submissions/:id/fields
async fn get_fields(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let extracted = fields::load_fields(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("fields for submission {}", id)))?;
    Ok(Json(serde_json::to_value(extracted).map_err(|e| {
        ApiError::Internal(format!("Fields serialization: {}", e))
    })?))
}

/// POST /kyc/submissions/:id/confirm-fields
///
/// Records the user's confirmation of their extracted fields; when a
/// deployment requires confirmation this unblocks auto-approval on the
/// next evaluation.
async fn confirm_fields(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let submission = submissions::load_submission(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("submission {}", id)))?;
    if submission.status.is_terminal() {
        return Err(ApiError::Conflict(
            "submission already decided".to_string(),
        ));
    }
    submissions::set_fields_confirmed(&state.db, id, true).await?;
    Ok(Json(json!({ "submission_id": id, "fields_confirmed": true })))
}
