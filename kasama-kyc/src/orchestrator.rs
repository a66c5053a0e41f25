//! Submission orchestration
//!
//! **[KYC-OR-010]** Receives a submission, fetches document bytes from
//! object storage, fans analyzer work out per document, persists analyses,
//! invokes the decision engine, and applies side effects (verified flag,
//! notifications, audit) — with the decision transaction as the only write
//! that matters for consistency.
//!
//! Error containment: a storage or decode failure on one document becomes
//! that document's SKIPPED analysis and never aborts siblings. The
//! submission-level deadline converts overflow into PENDING_HUMAN_REVIEW
//! ("analysis timeout") rather than an error.
//!
//! Face descriptors live only in memory for the duration of the evaluation;
//! they are never persisted. A re-run from persisted state (the sweeper
//! path) therefore has no similarity and can never auto-approve.

use crate::analyzers::{AnalyzerSet, TextRecognizer};
use crate::config::KycConfig;
use crate::db::documents::Document;
use crate::db::submissions::Submission;
use crate::db::{accounts, analyses, decisions, documents, fields, notifications, submissions};
use crate::decision::{Decision, DecisionContext, DecisionEngine};
use crate::extractor::{ExtractionInput, FieldExtractor};
use crate::matcher::FaceMatcher;
use crate::prewarm::FaceModelHandle;
use crate::storage::{fetch_with_retry, ObjectStorage, StorageError};
use crate::types::{
    Analysis, DecisionOutcome, DocumentRole, IdType, RejectionReason, SubmissionKind,
    SubmissionStatus, VerificationStatus,
};
use crate::verifier::DocumentVerifier;
use chrono::Utc;
use kasama_common::events::{EventBus, KasamaEvent, NotificationKind};
use kasama_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

/// One document reference inside a submission request
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub role: DocumentRole,
    pub bucket: String,
    pub path: String,
    /// MIME hint supplied by the uploading client
    pub mime_type: Option<String>,
    pub size_bytes: i64,
}

/// A submission request as accepted by the API
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub owner_id: Uuid,
    pub kind: SubmissionKind,
    pub id_type: IdType,
    pub documents: Vec<DocumentUpload>,
    /// The user confirmed the extracted fields client-side
    pub fields_confirmed: bool,
}

/// Result summary returned to the caller
#[derive(Debug, Clone)]
pub struct SubmissionSummary {
    pub submission_id: Uuid,
    pub outcome: DecisionOutcome,
    pub overall_confidence: f64,
    pub face_match_similarity: Option<f64>,
    pub rejection_message: Option<String>,
    pub document_statuses: Vec<(DocumentRole, VerificationStatus)>,
}

/// The submission orchestrator
pub struct SubmissionOrchestrator {
    db: SqlitePool,
    storage: Arc<dyn ObjectStorage>,
    face_model: FaceModelHandle,
    ocr_engine: Arc<dyn TextRecognizer>,
    extractor: FieldExtractor,
    matcher: FaceMatcher,
    event_bus: EventBus,
    config: KycConfig,
}

impl SubmissionOrchestrator {
    pub fn new(
        db: SqlitePool,
        storage: Arc<dyn ObjectStorage>,
        face_model: FaceModelHandle,
        ocr_engine: Arc<dyn TextRecognizer>,
        event_bus: EventBus,
        config: KycConfig,
    ) -> Self {
        Self {
            db,
            storage,
            face_model,
            ocr_engine,
            extractor: FieldExtractor::new(),
            matcher: FaceMatcher::new(),
            event_bus,
            config,
        }
    }

    /// Accept and fully process a new submission
    ///
    /// Input errors (unknown owner, missing required documents, duplicate
    /// roles, active cooldown) surface immediately and no submission is
    /// created. A concurrent open submission for the owner is a typed
    /// conflict.
    pub async fn submit(&self, request: SubmissionRequest) -> Result<SubmissionSummary> {
        self.validate(&request).await?;

        let mut submission = Submission::new(request.owner_id, request.kind, request.id_type);
        submission.fields_confirmed = request.fields_confirmed;
        submissions::create_submission(&self.db, &submission).await?;
        if request.fields_confirmed {
            submissions::set_fields_confirmed(&self.db, submission.guid, true).await?;
        }

        let mut docs = Vec::with_capacity(request.documents.len());
        for upload in &request.documents {
            let mut document =
                Document::new(submission.guid, upload.role, &upload.bucket, &upload.path);
            document.mime_type = upload.mime_type.clone();
            document.size_bytes = upload.size_bytes;
            documents::save_document(&self.db, &document).await?;
            docs.push(document);
        }

        self.event_bus.emit(KasamaEvent::SubmissionReceived {
            submission_id: submission.guid,
            owner_id: submission.owner_guid,
            document_count: docs.len(),
            timestamp: Utc::now(),
        });

        self.run_pipeline(&submission, &docs).await
    }

    /// Re-run processing for an existing submission
    ///
    /// Idempotent: when a decision already exists its summary is returned
    /// as-is and no notification is re-emitted. Used by the decision
    /// sweeper and by client retries of the same submission.
    pub async fn process_existing(&self, submission_id: Uuid) -> Result<SubmissionSummary> {
        let submission = submissions::load_submission(&self.db, submission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission_id)))?;

        if let Some(decision) = decisions::load_decision(&self.db, submission_id).await? {
            let stored = analyses::load_analyses(&self.db, submission_id).await?;
            return Ok(summary_from(&submission, &decision, &stored));
        }

        let docs = documents::load_documents(&self.db, submission_id).await?;
        self.run_pipeline(&submission, &docs).await
    }

    async fn validate(&self, request: &SubmissionRequest) -> Result<()> {
        let account = accounts::get_account(&self.db, request.owner_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("owner {}", request.owner_id)))?;

        if let Some(retry_at) = account.retry_eligible_at {
            if retry_at > Utc::now() {
                return Err(Error::Conflict(format!(
                    "retry cooldown active until {}",
                    retry_at.to_rfc3339()
                )));
            }
        }

        let mut seen_roles = Vec::new();
        for upload in &request.documents {
            if seen_roles.contains(&upload.role) {
                return Err(Error::InvalidInput(format!(
                    "duplicate document role {}",
                    upload.role.as_str()
                )));
            }
            seen_roles.push(upload.role);
            if upload.path.trim().is_empty() || upload.bucket.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "document storage reference is empty".to_string(),
                ));
            }
        }

        let missing: Vec<&str> = request
            .kind
            .required_roles()
            .iter()
            .filter(|role| !seen_roles.contains(role))
            .map(|role| role.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "missing required documents: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    /// Fetch, analyze, verify, extract, match, decide, persist
    async fn run_pipeline(
        &self,
        submission: &Submission,
        docs: &[Document],
    ) -> Result<SubmissionSummary> {
        let engine = self
            .face_model
            .engine()
            .await
            .ok_or_else(|| Error::Internal("face model loader terminated".to_string()))?;
        let analyzer_set = Arc::new(AnalyzerSet::new(
            engine,
            Arc::clone(&self.ocr_engine),
            self.config.deadlines.clone(),
        ));

        let deadline = Instant::now() + self.config.deadlines.submission;
        let mut join_set: JoinSet<(Uuid, DocumentRole, Analysis, Option<Vec<f32>>)> =
            JoinSet::new();

        for document in docs {
            let storage = Arc::clone(&self.storage);
            let analyzers = Arc::clone(&analyzer_set);
            let verifier = DocumentVerifier::new();
            let (doc_guid, role) = (document.guid, document.role);
            let (bucket, path) = (document.bucket.clone(), document.path.clone());

            join_set.spawn(async move {
                let bytes = match fetch_with_retry(storage.as_ref(), &bucket, &path).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let warning = match &e {
                            StorageError::NotFound { .. } => {
                                format!("Document not found in storage: {}/{}", bucket, path)
                            }
                            _ => format!("Storage fetch failed: {}", e),
                        };
                        tracing::warn!(role = role.as_str(), error = %e, "Document fetch failed");
                        return (
                            doc_guid,
                            role,
                            Analysis::skipped(RejectionReason::UnreadableDocument, warning),
                            None,
                        );
                    }
                };

                let signals = analyzers.analyze_document(&bytes, role).await;
                let descriptor = signals
                    .face
                    .as_ref()
                    .and_then(|f| f.descriptor.clone());
                let analysis = verifier.verify(role, &signals, Utc::now());
                (doc_guid, role, analysis, descriptor)
            });
        }

        let mut results: HashMap<Uuid, (DocumentRole, Analysis)> = HashMap::new();
        let mut descriptors: HashMap<DocumentRole, Vec<f32>> = HashMap::new();
        let mut timed_out = false;
        let mut first_result_seen = false;

        loop {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((doc_guid, role, analysis, descriptor)))) => {
                    if !first_result_seen {
                        first_result_seen = true;
                        // First analyzer completion moves the submission
                        // out of PENDING
                        submissions::set_status(
                            &self.db,
                            submission.guid,
                            SubmissionStatus::UnderReview,
                        )
                        .await?;
                    }
                    if let Some(descriptor) = descriptor {
                        descriptors.insert(role, descriptor);
                    }
                    results.insert(doc_guid, (role, analysis));
                }
                Ok(Some(Err(join_err))) => {
                    tracing::error!(error = %join_err, "Analyzer task failed");
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    tracing::warn!(
                        submission = %submission.guid,
                        "Submission deadline elapsed with analyzers outstanding"
                    );
                    timed_out = true;
                    join_set.abort_all();
                    break;
                }
            }
        }

        // Documents whose task never finished get a SKIPPED shell
        for document in docs {
            results.entry(document.guid).or_insert_with(|| {
                (
                    document.role,
                    Analysis::skipped(
                        RejectionReason::UnreadableDocument,
                        "Analysis did not complete before the submission deadline",
                    ),
                )
            });
        }

        for (doc_guid, (role, analysis)) in &results {
            analyses::save_analysis(&self.db, *doc_guid, submission.guid, analysis).await?;
            self.event_bus.emit(KasamaEvent::DocumentAnalyzed {
                submission_id: submission.guid,
                document_id: *doc_guid,
                role: role.as_str().to_string(),
                status: analysis.status.as_str().to_string(),
                confidence: analysis.ai_confidence,
                timestamp: Utc::now(),
            });
        }

        let role_analyses: Vec<(DocumentRole, Analysis)> = results
            .values()
            .map(|(role, analysis)| (*role, analysis.clone()))
            .collect();

        // Field extraction over the ID front/back text
        let extracted = self.extract_fields(submission.id_type, &role_analyses);
        fields::save_fields(&self.db, submission.guid, &extracted).await?;

        // 1:1 face match: ID front descriptor vs selfie descriptor
        let id_descriptor = descriptors
            .get(&DocumentRole::IdFront)
            .or_else(|| descriptors.get(&DocumentRole::RepIdFront));
        let selfie_descriptor = descriptors
            .get(&DocumentRole::Selfie)
            .or_else(|| descriptors.get(&DocumentRole::RepSelfie));
        let similarity = self.matcher.similarity(
            id_descriptor.map(|d| d.as_slice()),
            selfie_descriptor.map(|d| d.as_slice()),
        );

        // Decision under a by-value policy snapshot
        let engine = DecisionEngine::new(self.config.policy.clone());
        let decision = engine.decide(&DecisionContext {
            kind: submission.kind,
            analyses: &role_analyses,
            face_match_similarity: similarity,
            fields_confirmed: submission.fields_confirmed,
            timed_out,
        });

        let newly_decided = decisions::commit_decision(
            &self.db,
            submission.guid,
            submission.owner_guid,
            &decision,
            self.config.policy.retry_cooldown,
        )
        .await?;

        if newly_decided {
            // Notifications only after the transaction committed
            self.notify(submission, &decision).await?;
            self.event_bus.emit(KasamaEvent::DecisionReached {
                submission_id: submission.guid,
                outcome: decision.outcome.as_str().to_string(),
                overall_confidence: decision.overall_confidence,
                timestamp: Utc::now(),
            });
        }

        // Idempotence: the stored decision is authoritative
        let stored = decisions::load_decision(&self.db, submission.guid)
            .await?
            .unwrap_or(decision);

        Ok(SubmissionSummary {
            submission_id: submission.guid,
            outcome: stored.outcome,
            overall_confidence: stored.overall_confidence,
            face_match_similarity: stored.face_match_similarity,
            rejection_message: stored.rejection_message.clone(),
            document_statuses: role_analyses
                .iter()
                .map(|(role, a)| (*role, a.status))
                .collect(),
        })
    }

    fn extract_fields(
        &self,
        id_type: IdType,
        role_analyses: &[(DocumentRole, Analysis)],
    ) -> crate::types::ExtractedFields {
        let find_text = |role: DocumentRole| {
            role_analyses
                .iter()
                .find(|(r, _)| *r == role)
                .map(|(_, a)| (a.ocr_text.as_str(), a.ocr_confidence))
        };

        // Agency representative IDs use the same pattern tables
        let front = find_text(DocumentRole::IdFront).or_else(|| find_text(DocumentRole::RepIdFront));
        let back = find_text(DocumentRole::IdBack).or_else(|| find_text(DocumentRole::RepIdBack));
        let clearance = find_text(DocumentRole::Clearance);

        let mut id_text = String::new();
        let mut confidences = Vec::new();
        for (text, conf) in [front, back].into_iter().flatten() {
            if !text.is_empty() {
                if !id_text.is_empty() {
                    id_text.push('\n');
                }
                id_text.push_str(text);
                confidences.push(conf);
            }
        }
        let id_ocr_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        self.extractor.extract(&ExtractionInput {
            id_text: &id_text,
            id_ocr_confidence,
            id_type,
            clearance_text: clearance.map(|(t, _)| t),
            clearance_ocr_confidence: clearance.map(|(_, c)| c).unwrap_or(0.0),
        })
    }

    /// Emit owner notifications for a terminal outcome
    ///
    /// PENDING_HUMAN_REVIEW notifies reviewers out of band (event bus
    /// only); the owner hears nothing until a human decides.
    async fn notify(&self, submission: &Submission, decision: &Decision) -> Result<()> {
        let (kind, message, retry_at) = match (decision.outcome, submission.kind) {
            (DecisionOutcome::AutoApproved, SubmissionKind::Individual) => (
                NotificationKind::KycApproved,
                "Your identity has been verified.".to_string(),
                None,
            ),
            (DecisionOutcome::AutoApproved, SubmissionKind::Agency) => (
                NotificationKind::AgencyKycApproved,
                "Your agency has been verified.".to_string(),
                None,
            ),
            (DecisionOutcome::AutoRejected, submission_kind) => {
                let kind = match submission_kind {
                    SubmissionKind::Individual => NotificationKind::KycRejected,
                    SubmissionKind::Agency => NotificationKind::AgencyKycRejected,
                };
                let retry_at = decision.decided_at
                    + chrono::Duration::from_std(self.config.policy.retry_cooldown)
                        .map_err(|e| Error::Internal(format!("Cooldown out of range: {}", e)))?;
                let message = decision
                    .rejection_message
                    .clone()
                    .unwrap_or_else(|| "Your verification was not successful.".to_string());
                (kind, message, Some(retry_at))
            }
            (DecisionOutcome::PendingHumanReview, _) => return Ok(()),
        };

        let inserted = notifications::insert_unique(
            &self.db,
            submission.owner_guid,
            submission.guid,
            kind,
            &message,
            retry_at,
        )
        .await?;

        if inserted {
            self.event_bus.emit(KasamaEvent::Notification {
                submission_id: submission.guid,
                owner_id: submission.owner_guid,
                kind,
                message,
                retry_eligible_at: retry_at,
            });
        }

        Ok(())
    }
}

fn summary_from(
    submission: &Submission,
    decision: &Decision,
    stored: &[(Uuid, DocumentRole, Analysis)],
) -> SubmissionSummary {
    SubmissionSummary {
        submission_id: submission.guid,
        outcome: decision.outcome,
        overall_confidence: decision.overall_confidence,
        face_match_similarity: decision.face_match_similarity,
        rejection_message: decision.rejection_message.clone(),
        document_statuses: stored
            .iter()
            .map(|(_, role, analysis)| (*role, analysis.status))
            .collect(),
    }
}
