//! Human review endpoint
//!
//! The fallback path for PENDING_HUMAN_REVIEW outcomes: a reviewer
//! approves or rejects, with the same transactional side effects as the
//! automated engine (status, verified flag, audit, notification).

use crate::db::{accounts, audit, notifications, submissions};
use crate::error::{ApiError, ApiResult};
use crate::types::{SubmissionKind, SubmissionStatus};
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use kasama_common::events::{KasamaEvent, NotificationKind};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub fn review_routes() -> Router<AppState> {
    Router::new().route("/kyc/submissions/:id/review", post(review_submission))
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    reviewer_id: Uuid,
    approve: bool,
    notes: Option<String>,
}

/// POST /kyc/submissions/:id/review
async fn review_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let submission = submissions::load_submission(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("submission {}", id)))?;

    if submission.status.is_terminal() {
        return Err(ApiError::Conflict("submission already decided".to_string()));
    }

    let decided_at = Utc::now();
    let status = if payload.approve {
        SubmissionStatus::Approved
    } else {
        SubmissionStatus::Rejected
    };

    // Same transaction boundary as the automated decision: status, flag,
    // and audit land together
    let mut tx = state.db.begin().await.map_err(kasama_common::Error::from)?;
    submissions::set_status_tx(&mut tx, id, status, Some(decided_at)).await?;
    accounts::set_verified_tx(&mut tx, submission.owner_guid, payload.approve).await?;
    if !payload.approve {
        let cooldown = chrono::Duration::from_std(state.config.policy.retry_cooldown)
            .map_err(|e| ApiError::Internal(format!("Cooldown out of range: {}", e)))?;
        accounts::set_retry_eligible_tx(&mut tx, submission.owner_guid, decided_at + cooldown)
            .await?;
    }
    audit::append_tx(
        &mut tx,
        id,
        submission.owner_guid,
        if payload.approve {
            "REVIEW_APPROVED"
        } else {
            "REVIEW_REJECTED"
        },
        payload.notes.as_deref().unwrap_or(""),
    )
    .await?;
    tx.commit().await.map_err(kasama_common::Error::from)?;

    submissions::set_reviewer(&state.db, id, payload.reviewer_id, payload.notes.as_deref())
        .await?;

    // Notification after commit, idempotent on (submission, kind)
    let (kind, message) = match (payload.approve, submission.kind) {
        (true, SubmissionKind::Individual) => (
            NotificationKind::KycApproved,
            "Your identity has been verified.".to_string(),
        ),
        (true, SubmissionKind::Agency) => (
            NotificationKind::AgencyKycApproved,
            "Your agency has been verified.".to_string(),
        ),
        (false, SubmissionKind::Individual) => (
            NotificationKind::KycRejected,
            "Your verification was not successful after review.".to_string(),
        ),
        (false, SubmissionKind::Agency) => (
            NotificationKind::AgencyKycRejected,
            "Your agency verification was not successful after review.".to_string(),
        ),
    };
    let inserted = notifications::insert_unique(
        &state.db,
        submission.owner_guid,
        id,
        kind,
        &message,
        None,
    )
    .await?;
    if inserted {
        state.event_bus.emit(KasamaEvent::Notification {
            submission_id: id,
            owner_id: submission.owner_guid,
            kind,
            message,
            retry_eligible_at: None,
        });
    }

    Ok(Json(json!({
        "submission_id": id,
        "status": status.as_str(),
        "reviewer_id": payload.reviewer_id,
    })))
}
