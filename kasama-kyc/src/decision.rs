//! KYC decision engine
//!
//! **[KYC-DE-010]** Aggregates per-document verdicts, the face match, and
//! the policy snapshot into AUTO_APPROVED / AUTO_REJECTED /
//! PENDING_HUMAN_REVIEW.
//!
//! Tie-breaks: exactly-equal-to-threshold passes; a similarity inside the
//! open drift band (min, min + 0.05) goes to human review even when every
//! other signal passes; a `None` similarity can never auto-approve.
//! Auto-approval is additionally gated on the deployment opt-in
//! (`auto_approve_enabled`, default off) — auto-rejection applies either way.

use crate::config::KycPolicy;
use crate::types::{Analysis, DecisionOutcome, DocumentRole, SubmissionKind, VerificationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-facing message for a failed ID-to-selfie match
pub const FACE_MISMATCH_MESSAGE: &str =
    "Your selfie does not match the photo on your ID. Please retake your selfie in good lighting.";

/// Reason string recorded when the submission deadline elapsed
pub const ANALYSIS_TIMEOUT_REASON: &str = "analysis timeout";

/// Everything the engine needs for one submission
#[derive(Debug)]
pub struct DecisionContext<'a> {
    pub kind: SubmissionKind,
    /// Analyses keyed by role; at most one document per role
    pub analyses: &'a [(DocumentRole, Analysis)],
    /// ID-to-selfie similarity; None when either descriptor was absent
    pub face_match_similarity: Option<f64>,
    /// Whether the user has confirmed the extracted fields
    pub fields_confirmed: bool,
    /// The submission-level deadline elapsed before all analyzers finished
    pub timed_out: bool,
}

/// The aggregate outcome record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    /// Weighted mean of per-document confidences, SKIPPED excluded
    pub overall_confidence: f64,
    pub face_match_similarity: Option<f64>,
    /// User-facing message on rejection
    pub rejection_message: Option<String>,
    /// Audit trail: why this outcome
    pub reasons: Vec<String>,
    /// Snapshot of the thresholds that applied
    pub applied_thresholds: serde_json::Value,
    pub decided_at: DateTime<Utc>,
}

/// Decision engine holding a policy snapshot
///
/// The snapshot is copied by value per submission; policy reloads happen
/// between submissions, never during one.
pub struct DecisionEngine {
    policy: KycPolicy,
}

impl DecisionEngine {
    pub fn new(policy: KycPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &KycPolicy {
        &self.policy
    }

    /// Decide the outcome for one submission
    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Decision {
        let now = Utc::now();
        let thresholds = serde_json::json!({
            "auto_approve_enabled": self.policy.auto_approve_enabled,
            "auto_approve_min_confidence": self.policy.auto_approve_min_confidence,
            "face_match_min_similarity": self.policy.face_match_min_similarity,
            "similarity_drift_band": self.policy.similarity_drift_band,
            "require_user_confirmation": self.policy.require_user_confirmation,
            "retry_cooldown_seconds": self.policy.retry_cooldown.as_secs(),
        });

        let overall_confidence = overall_confidence(ctx.analyses);

        // Step 1: every required document must be present
        let missing: Vec<&str> = ctx
            .kind
            .required_roles()
            .iter()
            .filter(|role| !ctx.analyses.iter().any(|(r, _)| r == *role))
            .map(|role| role.as_str())
            .collect();
        if !missing.is_empty() {
            return Decision {
                outcome: DecisionOutcome::AutoRejected,
                overall_confidence,
                face_match_similarity: ctx.face_match_similarity,
                rejection_message: Some(format!(
                    "Your submission is missing required documents: {}",
                    missing.join(", ")
                )),
                reasons: vec![format!("incomplete documents: {}", missing.join(", "))],
                applied_thresholds: thresholds,
                decided_at: now,
            };
        }

        // Step 2: a hard FAILED reason rejects outright
        let hard_failure = ctx.analyses.iter().find_map(|(role, a)| {
            if a.status != VerificationStatus::Failed {
                return None;
            }
            a.rejection_reason
                .filter(|r| r.is_hard())
                .map(|reason| (role, a, reason))
        });
        if let Some((role, analysis, reason)) = hard_failure {
            return Decision {
                outcome: DecisionOutcome::AutoRejected,
                overall_confidence,
                face_match_similarity: ctx.face_match_similarity,
                rejection_message: analysis
                    .rejection_message
                    .clone()
                    .or_else(|| Some(reason.user_message().to_string())),
                reasons: vec![format!("{} on {}", reason.as_str(), role.as_str())],
                applied_thresholds: thresholds,
                decided_at: now,
            };
        }

        // A similarity below threshold is a hard mismatch (equal passes)
        if let Some(similarity) = ctx.face_match_similarity {
            if similarity < self.policy.face_match_min_similarity {
                return Decision {
                    outcome: DecisionOutcome::AutoRejected,
                    overall_confidence,
                    face_match_similarity: ctx.face_match_similarity,
                    rejection_message: Some(FACE_MISMATCH_MESSAGE.to_string()),
                    reasons: vec![format!(
                        "face match {:.3} below threshold {:.3}",
                        similarity, self.policy.face_match_min_similarity
                    )],
                    applied_thresholds: thresholds,
                    decided_at: now,
                };
            }
        }

        // Everything past this point can only approve or go to review
        let mut review_reasons: Vec<String> = Vec::new();

        if ctx.timed_out {
            review_reasons.push(ANALYSIS_TIMEOUT_REASON.to_string());
        }

        if overall_confidence < self.policy.auto_approve_min_confidence {
            review_reasons.push(format!(
                "overall confidence {:.3} below threshold {:.3}",
                overall_confidence, self.policy.auto_approve_min_confidence
            ));
        }

        match ctx.face_match_similarity {
            None => {
                review_reasons.push("face match unavailable".to_string());
            }
            Some(similarity) => {
                let band_top =
                    self.policy.face_match_min_similarity + self.policy.similarity_drift_band;
                // Open interval: equal to the threshold passes outright
                if similarity > self.policy.face_match_min_similarity && similarity < band_top {
                    review_reasons.push(format!(
                        "face match {:.3} inside calibration drift band ({:.3}, {:.3})",
                        similarity, self.policy.face_match_min_similarity, band_top
                    ));
                }
            }
        }

        if let Some((role, _)) = ctx
            .analyses
            .iter()
            .find(|(_, a)| a.status == VerificationStatus::Warning)
        {
            review_reasons.push(format!("warning verdict on {}", role.as_str()));
        }

        if self.policy.require_user_confirmation && !ctx.fields_confirmed {
            review_reasons.push("extracted fields not yet confirmed by user".to_string());
        }

        if review_reasons.is_empty() && !self.policy.auto_approve_enabled {
            review_reasons.push("auto-approval disabled for this deployment".to_string());
        }

        if review_reasons.is_empty() {
            Decision {
                outcome: DecisionOutcome::AutoApproved,
                overall_confidence,
                face_match_similarity: ctx.face_match_similarity,
                rejection_message: None,
                reasons: vec![format!(
                    "confidence {:.3} and face match {:.3} at or above thresholds",
                    overall_confidence,
                    ctx.face_match_similarity.unwrap_or_default()
                )],
                applied_thresholds: thresholds,
                decided_at: now,
            }
        } else {
            Decision {
                outcome: DecisionOutcome::PendingHumanReview,
                overall_confidence,
                face_match_similarity: ctx.face_match_similarity,
                rejection_message: None,
                reasons: review_reasons,
                applied_thresholds: thresholds,
                decided_at: now,
            }
        }
    }
}

/// Weighted mean of per-document confidences
///
/// SKIPPED documents are excluded from the denominator entirely.
fn overall_confidence(analyses: &[(DocumentRole, Analysis)]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (role, analysis) in analyses {
        if analysis.status == VerificationStatus::Skipped {
            continue;
        }
        let weight = role.confidence_weight();
        weighted_sum += analysis.ai_confidence * weight;
        weight_total += weight;
    }
    if weight_total <= f64::EPSILON {
        0.0
    } else {
        weighted_sum / weight_total
    }
}
