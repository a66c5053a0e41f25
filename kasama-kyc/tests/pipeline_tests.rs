//! End-to-end pipeline tests
//!
//! Drive the orchestrator with in-memory SQLite, in-memory object storage,
//! and scripted face/OCR backends. Documents are real PNGs (the quality
//! scorer decodes them) tagged with a trailing marker the scripted
//! backends key on.

use image::{DynamicImage, GrayImage, Luma};
use kasama_common::events::{EventBus, NotificationKind};
use kasama_kyc::analyzers::{
    FaceBackend, FaceDetection, FaceEngine, FaceError, OcrOutcome, OcrText, TextRecognizer,
};
use kasama_kyc::config::{KycConfig, KycPolicy};
use kasama_kyc::db::{accounts, analyses, decisions, notifications, submissions};
use kasama_kyc::orchestrator::{DocumentUpload, SubmissionOrchestrator, SubmissionRequest};
use kasama_kyc::prewarm::FaceModelHandle;
use kasama_kyc::storage::MemoryStorage;
use kasama_kyc::types::{
    DecisionOutcome, DocumentRole, IdType, SubmissionKind, SubmissionStatus, VerificationStatus,
};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

const TAG_MARKER: &[u8] = b"####TAG:";

fn sharp_png(width: u32, height: u32) -> Vec<u8> {
    let img = GrayImage::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn tagged(mut bytes: Vec<u8>, tag: &str) -> Vec<u8> {
    bytes.extend_from_slice(TAG_MARKER);
    bytes.extend_from_slice(tag.as_bytes());
    bytes.extend_from_slice(b"####");
    bytes
}

fn tag_of(bytes: &[u8]) -> Option<String> {
    let pos = bytes
        .windows(TAG_MARKER.len())
        .rposition(|w| w == TAG_MARKER)?;
    let rest = &bytes[pos + TAG_MARKER.len()..];
    let end = rest.windows(4).position(|w| w == b"####")?;
    String::from_utf8(rest[..end].to_vec()).ok()
}

/// Descriptor pair whose cosine-mapped similarity equals `target`
fn descriptor_pair(target: f64) -> (Vec<f32>, Vec<f32>) {
    let cosine = (2.0 * target - 1.0).clamp(-1.0, 1.0);
    let a = vec![1.0f32, 0.0];
    let b = vec![cosine as f32, (1.0 - cosine * cosine).sqrt() as f32];
    (a, b)
}

fn face(confidence: f64, descriptor: Vec<f32>) -> FaceDetection {
    FaceDetection {
        face_count: 1,
        face_confidence: confidence,
        descriptor: Some(descriptor),
        primary_area_fraction: Some(0.30),
        issue: None,
        warnings: vec![],
        backend: "scripted",
    }
}

struct ScriptedFaceBackend {
    by_tag: HashMap<String, FaceDetection>,
}

#[async_trait::async_trait]
impl FaceBackend for ScriptedFaceBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn detect(&self, bytes: &[u8], _expected: u32) -> Result<FaceDetection, FaceError> {
        let tag = tag_of(bytes).unwrap_or_default();
        Ok(self.by_tag.get(&tag).cloned().unwrap_or(FaceDetection {
            face_count: 0,
            face_confidence: 0.0,
            descriptor: None,
            primary_area_fraction: None,
            issue: None,
            warnings: vec![],
            backend: "scripted",
        }))
    }
}

struct ScriptedOcr {
    by_tag: HashMap<String, (String, f64)>,
}

#[async_trait::async_trait]
impl TextRecognizer for ScriptedOcr {
    async fn recognize(&self, bytes: &[u8]) -> OcrOutcome {
        match tag_of(bytes).and_then(|tag| self.by_tag.get(&tag).cloned()) {
            Some((text, confidence)) => OcrOutcome::Text(OcrText {
                word_count: text.split_whitespace().count(),
                text,
                mean_confidence: confidence,
                warnings: vec![],
            }),
            None => OcrOutcome::Unavailable {
                reason: "no scripted output".to_string(),
            },
        }
    }
}

struct Harness {
    pool: SqlitePool,
    storage: Arc<MemoryStorage>,
    orchestrator: SubmissionOrchestrator,
    event_bus: EventBus,
}

async fn harness(
    faces: HashMap<String, FaceDetection>,
    ocr: HashMap<String, (String, f64)>,
) -> Harness {
    let pool = kasama_kyc::db::init_memory_pool().await.unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let event_bus = EventBus::new(64);

    let engine = Arc::new(FaceEngine::new(
        Arc::new(ScriptedFaceBackend { by_tag: faces }),
        None,
    ));
    let config = KycConfig {
        policy: KycPolicy {
            auto_approve_enabled: true,
            ..KycPolicy::default()
        },
        ..KycConfig::default()
    };

    let orchestrator = SubmissionOrchestrator::new(
        pool.clone(),
        Arc::clone(&storage) as Arc<dyn kasama_kyc::storage::ObjectStorage>,
        FaceModelHandle::ready_now(engine),
        Arc::new(ScriptedOcr { by_tag: ocr }),
        event_bus.clone(),
        config,
    );

    Harness {
        pool,
        storage,
        orchestrator,
        event_bus,
    }
}

fn upload(role: DocumentRole, path: &str) -> DocumentUpload {
    DocumentUpload {
        role,
        bucket: "kyc-docs".to_string(),
        path: path.to_string(),
        mime_type: Some("image/png".to_string()),
        size_bytes: 1024,
    }
}

const FRONT_TEXT: &str = "REPUBLIKA NG PILIPINAS\nSURNAME: DELA CRUZ\nGIVEN NAMES: JUAN\nDATE OF BIRTH: January 15, 1990\nPSN: 1234-5678-9012-3456";

/// Individual documents with the given ID/selfie similarity
async fn individual_harness(similarity: f64) -> (Harness, Uuid, SubmissionRequest) {
    let (id_desc, selfie_desc) = descriptor_pair(similarity);

    let mut faces = HashMap::new();
    faces.insert("front".to_string(), face(0.97, id_desc));
    faces.insert("selfie".to_string(), face(0.96, selfie_desc));

    let mut ocr = HashMap::new();
    ocr.insert("front".to_string(), (FRONT_TEXT.to_string(), 0.92));
    ocr.insert(
        "back".to_string(),
        ("ADDRESS: 123 MABINI ST QUEZON CITY".to_string(), 0.90),
    );

    let h = harness(faces, ocr).await;

    h.storage
        .put("kyc-docs", "front.png", tagged(sharp_png(640, 640), "front"))
        .await;
    h.storage
        .put("kyc-docs", "back.png", tagged(sharp_png(640, 640), "back"))
        .await;
    h.storage
        .put("kyc-docs", "selfie.png", tagged(sharp_png(640, 640), "selfie"))
        .await;

    let owner = Uuid::new_v4();
    accounts::create_account(&h.pool, owner, SubmissionKind::Individual)
        .await
        .unwrap();

    let request = SubmissionRequest {
        owner_id: owner,
        kind: SubmissionKind::Individual,
        id_type: IdType::PhilsysId,
        documents: vec![
            upload(DocumentRole::IdFront, "front.png"),
            upload(DocumentRole::IdBack, "back.png"),
            upload(DocumentRole::Selfie, "selfie.png"),
        ],
        fields_confirmed: true,
    };

    (h, owner, request)
}

#[tokio::test]
async fn clean_individual_submission_auto_approves() {
    let (h, owner, request) = individual_harness(0.91).await;
    let summary = h.orchestrator.submit(request).await.unwrap();

    assert_eq!(summary.outcome, DecisionOutcome::AutoApproved);
    assert!(summary.overall_confidence >= 0.90);

    // Owner verified flag synchronized with the outcome
    let account = accounts::get_account(&h.pool, owner).await.unwrap().unwrap();
    assert!(account.verified);

    // Exactly one KYC_APPROVED notification
    let notes = notifications::list_for_owner(&h.pool, owner).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::KycApproved);

    // Submission reached APPROVED with a decision timestamp
    let stored = submissions::load_submission(&h.pool, summary.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubmissionStatus::Approved);
    assert!(stored.decided_at.is_some());

    // Exactly one analysis per document
    let stored_analyses = analyses::load_analyses(&h.pool, summary.submission_id)
        .await
        .unwrap();
    assert_eq!(stored_analyses.len(), 3);
}

#[tokio::test]
async fn face_mismatch_auto_rejects_with_cooldown() {
    let (h, owner, request) = individual_harness(0.62).await;
    let summary = h.orchestrator.submit(request).await.unwrap();

    assert_eq!(summary.outcome, DecisionOutcome::AutoRejected);
    assert!(summary
        .rejection_message
        .as_deref()
        .unwrap()
        .contains("does not match"));

    let account = accounts::get_account(&h.pool, owner).await.unwrap().unwrap();
    assert!(!account.verified);
    assert!(account.retry_eligible_at.unwrap() > chrono::Utc::now());

    let notes = notifications::list_for_owner(&h.pool, owner).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::KycRejected);
    assert!(notes[0].retry_eligible_at.is_some());
}

#[tokio::test]
async fn borderline_similarity_goes_to_human_review() {
    let (h, owner, request) = individual_harness(0.87).await;
    let summary = h.orchestrator.submit(request).await.unwrap();

    assert_eq!(summary.outcome, DecisionOutcome::PendingHumanReview);

    let stored = submissions::load_submission(&h.pool, summary.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubmissionStatus::UnderReview);

    // No flag change, no owner notification
    let account = accounts::get_account(&h.pool, owner).await.unwrap().unwrap();
    assert!(!account.verified);
    assert!(notifications::list_for_owner(&h.pool, owner)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unreadable_back_is_skipped_and_excluded_from_confidence() {
    let (h, _owner, request) = individual_harness(0.93).await;
    // Overwrite the back with bytes that decode as nothing
    h.storage
        .put("kyc-docs", "back.png", b"definitely not an image".to_vec())
        .await;

    let summary = h.orchestrator.submit(request).await.unwrap();

    let back_status = summary
        .document_statuses
        .iter()
        .find(|(role, _)| *role == DocumentRole::IdBack)
        .map(|(_, status)| *status)
        .unwrap();
    assert_eq!(back_status, VerificationStatus::Skipped);

    // Front and selfie carry the confidence; outcome still auto-approves
    assert_eq!(summary.outcome, DecisionOutcome::AutoApproved);
}

#[tokio::test]
async fn expired_nbi_clearance_auto_rejects() {
    let (id_desc, selfie_desc) = descriptor_pair(0.93);
    let mut faces = HashMap::new();
    faces.insert("front".to_string(), face(0.97, id_desc));
    faces.insert("selfie".to_string(), face(0.96, selfie_desc));

    let past = (chrono::Utc::now() - chrono::Duration::days(10))
        .format("%Y-%m-%d")
        .to_string();
    let mut ocr = HashMap::new();
    ocr.insert("front".to_string(), (FRONT_TEXT.to_string(), 0.92));
    ocr.insert("back".to_string(), ("ADDRESS: MABINI ST".to_string(), 0.90));
    ocr.insert(
        "clearance".to_string(),
        (format!("NBI CLEARANCE\nVALID UNTIL: {}", past), 0.91),
    );

    let h = harness(faces, ocr).await;
    for (path, tag) in [
        ("front.png", "front"),
        ("back.png", "back"),
        ("selfie.png", "selfie"),
        ("clearance.png", "clearance"),
    ] {
        h.storage
            .put("kyc-docs", path, tagged(sharp_png(640, 640), tag))
            .await;
    }

    let owner = Uuid::new_v4();
    accounts::create_account(&h.pool, owner, SubmissionKind::Individual)
        .await
        .unwrap();

    let summary = h
        .orchestrator
        .submit(SubmissionRequest {
            owner_id: owner,
            kind: SubmissionKind::Individual,
            id_type: IdType::PhilsysId,
            documents: vec![
                upload(DocumentRole::IdFront, "front.png"),
                upload(DocumentRole::IdBack, "back.png"),
                upload(DocumentRole::Selfie, "selfie.png"),
                upload(DocumentRole::Clearance, "clearance.png"),
            ],
            fields_confirmed: true,
        })
        .await
        .unwrap();

    assert_eq!(summary.outcome, DecisionOutcome::AutoRejected);
    let clearance_status = summary
        .document_statuses
        .iter()
        .find(|(role, _)| *role == DocumentRole::Clearance)
        .map(|(_, status)| *status)
        .unwrap();
    assert_eq!(clearance_status, VerificationStatus::Failed);
}

#[tokio::test]
async fn agency_submission_auto_approves_with_agency_notification() {
    let (rep_desc, rep_selfie_desc) = descriptor_pair(0.93);
    let mut faces = HashMap::new();
    faces.insert("rep_front".to_string(), face(0.97, rep_desc));
    faces.insert("rep_selfie".to_string(), face(0.96, rep_selfie_desc));

    let mut ocr = HashMap::new();
    ocr.insert(
        "permit".to_string(),
        ("CITY OF MANILA\nBUSINESS PERMIT\n2026".to_string(), 0.93),
    );
    ocr.insert("rep_front".to_string(), (FRONT_TEXT.to_string(), 0.92));
    ocr.insert("rep_back".to_string(), ("ADDRESS: TAFT AVE".to_string(), 0.90));
    ocr.insert(
        "address".to_string(),
        ("MERALCO BILL\n123 TAFT AVE MANILA".to_string(), 0.88),
    );
    ocr.insert(
        "letter".to_string(),
        ("AUTHORIZATION LETTER".to_string(), 0.85),
    );

    let h = harness(faces, ocr).await;
    for (path, tag) in [
        ("permit.png", "permit"),
        ("rep_front.png", "rep_front"),
        ("rep_back.png", "rep_back"),
        ("rep_selfie.png", "rep_selfie"),
        ("address.png", "address"),
        ("letter.png", "letter"),
    ] {
        h.storage
            .put("agency", path, tagged(sharp_png(640, 640), tag))
            .await;
    }

    let owner = Uuid::new_v4();
    accounts::create_account(&h.pool, owner, SubmissionKind::Agency)
        .await
        .unwrap();

    let agency_upload = |role, path: &str| DocumentUpload {
        role,
        bucket: "agency".to_string(),
        path: path.to_string(),
        mime_type: Some("image/png".to_string()),
        size_bytes: 2048,
    };

    let summary = h
        .orchestrator
        .submit(SubmissionRequest {
            owner_id: owner,
            kind: SubmissionKind::Agency,
            id_type: IdType::BusinessPermit,
            documents: vec![
                agency_upload(DocumentRole::BusinessPermit, "permit.png"),
                agency_upload(DocumentRole::RepIdFront, "rep_front.png"),
                agency_upload(DocumentRole::RepIdBack, "rep_back.png"),
                agency_upload(DocumentRole::RepSelfie, "rep_selfie.png"),
                agency_upload(DocumentRole::AddressProof, "address.png"),
                agency_upload(DocumentRole::AuthLetter, "letter.png"),
            ],
            fields_confirmed: true,
        })
        .await
        .unwrap();

    assert_eq!(summary.outcome, DecisionOutcome::AutoApproved);

    let notes = notifications::list_for_owner(&h.pool, owner).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::AgencyKycApproved);
}

#[tokio::test]
async fn resubmission_is_idempotent() {
    let (h, owner, request) = individual_harness(0.91).await;
    let first = h.orchestrator.submit(request).await.unwrap();

    // Re-processing the same submission returns the stored decision and
    // emits no second notification
    let second = h
        .orchestrator
        .process_existing(first.submission_id)
        .await
        .unwrap();
    assert_eq!(second.outcome, first.outcome);
    assert_eq!(second.overall_confidence, first.overall_confidence);

    let notes = notifications::list_for_owner(&h.pool, owner).await.unwrap();
    assert_eq!(notes.len(), 1);

    let decision = decisions::load_decision(&h.pool, first.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.outcome, DecisionOutcome::AutoApproved);
}

#[tokio::test]
async fn concurrent_open_submission_is_rejected_with_conflict() {
    let (h, owner, request) = individual_harness(0.87).await;
    // First lands in UNDER_REVIEW (open)
    h.orchestrator.submit(request.clone()).await.unwrap();

    let result = h.orchestrator.submit(request).await;
    match result {
        Err(kasama_common::Error::Conflict(msg)) => {
            assert!(msg.contains("pending"), "unexpected message: {}", msg);
        }
        other => panic!("Expected conflict, got {:?}", other.map(|s| s.outcome)),
    }
    let _ = owner;
}

#[tokio::test]
async fn missing_required_document_is_an_input_error() {
    let (h, _owner, mut request) = individual_harness(0.91).await;
    request.documents.retain(|d| d.role != DocumentRole::Selfie);

    let result = h.orchestrator.submit(request).await;
    match result {
        Err(kasama_common::Error::InvalidInput(msg)) => {
            assert!(msg.contains("SELFIE"));
        }
        other => panic!("Expected input error, got {:?}", other.map(|s| s.outcome)),
    }
}

#[tokio::test]
async fn storage_retry_recovers_transient_failures() {
    let (h, _owner, request) = individual_harness(0.91).await;
    // Two transient failures drain before the retry schedule gives up
    h.storage.inject_transient_failures(2).await;

    let summary = h.orchestrator.submit(request).await.unwrap();
    // All documents analyzed despite the injected failures
    assert!(summary
        .document_statuses
        .iter()
        .all(|(_, status)| *status != VerificationStatus::Skipped));
}

#[tokio::test]
async fn decision_events_are_broadcast() {
    let (h, _owner, request) = individual_harness(0.91).await;
    let mut rx = h.event_bus.subscribe();

    h.orchestrator.submit(request).await.unwrap();

    let mut saw_received = false;
    let mut saw_decision = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            kasama_common::events::KasamaEvent::SubmissionReceived { .. } => saw_received = true,
            kasama_common::events::KasamaEvent::DecisionReached { outcome, .. } => {
                assert_eq!(outcome, "AUTO_APPROVED");
                saw_decision = true;
            }
            _ => {}
        }
    }
    assert!(saw_received);
    assert!(saw_decision);
}

#[tokio::test]
async fn unconfirmed_fields_block_auto_approval() {
    let (h, _owner, mut request) = individual_harness(0.91).await;
    request.fields_confirmed = false;

    let summary = h.orchestrator.submit(request).await.unwrap();
    assert_eq!(summary.outcome, DecisionOutcome::PendingHumanReview);
}

#[tokio::test]
async fn extracted_fields_are_persisted_with_confidences() {
    let (h, _owner, request) = individual_harness(0.91).await;
    let summary = h.orchestrator.submit(request).await.unwrap();

    let fields = kasama_kyc::db::fields::load_fields(&h.pool, summary.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fields.last_name.value.as_deref(), Some("Dela Cruz"));
    assert_eq!(fields.first_name.value.as_deref(), Some("Juan"));
    assert_eq!(fields.birthdate.value.as_deref(), Some("1990-01-15"));
    assert!(fields.last_name.confidence.unwrap() > 0.8);
    // Fields that never appeared keep a None confidence
    assert!(fields.nationality.confidence.is_none());
}
