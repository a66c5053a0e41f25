//! Core domain types for the KYC verification pipeline
//!
//! **[KYC-DM-010]** Closed enums for submission/document/analysis state.
//! All enums are stored as TEXT in SQLite via `as_str`/`parse` pairs and
//! matched exhaustively; document roles are a closed tagged variant driving
//! the table-driven verifier, not open-ended subclassing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OCR text is truncated to this many bytes (on a char boundary) before
/// persistence. Text exactly at the bound is stored untruncated.
pub const OCR_TEXT_MAX_BYTES: usize = 4096;

/// Parse failure for a closed enum loaded from persistence
#[derive(Debug, Error)]
#[error("Unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Submission owner kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionKind {
    Individual,
    Agency,
}

impl SubmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionKind::Individual => "INDIVIDUAL",
            SubmissionKind::Agency => "AGENCY",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "INDIVIDUAL" => Ok(SubmissionKind::Individual),
            "AGENCY" => Ok(SubmissionKind::Agency),
            other => Err(ParseEnumError { kind: "submission kind", value: other.to_string() }),
        }
    }

    /// Documents that must be present for this submission kind
    pub fn required_roles(&self) -> &'static [DocumentRole] {
        match self {
            SubmissionKind::Individual => &[
                DocumentRole::IdFront,
                DocumentRole::IdBack,
                DocumentRole::Selfie,
            ],
            SubmissionKind::Agency => &[
                DocumentRole::BusinessPermit,
                DocumentRole::RepIdFront,
                DocumentRole::RepIdBack,
                DocumentRole::RepSelfie,
                DocumentRole::AddressProof,
                DocumentRole::AuthLetter,
            ],
        }
    }
}

/// Terminal and in-flight submission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::UnderReview => "UNDER_REVIEW",
            SubmissionStatus::Approved => "APPROVED",
            SubmissionStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "PENDING" => Ok(SubmissionStatus::Pending),
            "UNDER_REVIEW" => Ok(SubmissionStatus::UnderReview),
            "APPROVED" => Ok(SubmissionStatus::Approved),
            "REJECTED" => Ok(SubmissionStatus::Rejected),
            other => Err(ParseEnumError { kind: "submission status", value: other.to_string() }),
        }
    }

    /// A submission in a terminal state cannot transition further
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Approved | SubmissionStatus::Rejected)
    }
}

/// Declared identity document type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdType {
    NationalId,
    DriversLicense,
    PhilsysId,
    Passport,
    BusinessPermit,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::NationalId => "NATIONAL_ID",
            IdType::DriversLicense => "DRIVERS_LICENSE",
            IdType::PhilsysId => "PHILSYS_ID",
            IdType::Passport => "PASSPORT",
            IdType::BusinessPermit => "BUSINESS_PERMIT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "NATIONAL_ID" => Ok(IdType::NationalId),
            "DRIVERS_LICENSE" => Ok(IdType::DriversLicense),
            "PHILSYS_ID" => Ok(IdType::PhilsysId),
            "PASSPORT" => Ok(IdType::Passport),
            "BUSINESS_PERMIT" => Ok(IdType::BusinessPermit),
            other => Err(ParseEnumError { kind: "id type", value: other.to_string() }),
        }
    }
}

/// Semantic purpose of an uploaded file (not its MIME type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentRole {
    IdFront,
    IdBack,
    Selfie,
    Clearance,
    AddressProof,
    BusinessPermit,
    RepIdFront,
    RepIdBack,
    RepSelfie,
    AuthLetter,
}

impl DocumentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentRole::IdFront => "ID_FRONT",
            DocumentRole::IdBack => "ID_BACK",
            DocumentRole::Selfie => "SELFIE",
            DocumentRole::Clearance => "CLEARANCE",
            DocumentRole::AddressProof => "ADDRESS_PROOF",
            DocumentRole::BusinessPermit => "BUSINESS_PERMIT",
            DocumentRole::RepIdFront => "REP_ID_FRONT",
            DocumentRole::RepIdBack => "REP_ID_BACK",
            DocumentRole::RepSelfie => "REP_SELFIE",
            DocumentRole::AuthLetter => "AUTH_LETTER",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "ID_FRONT" => Ok(DocumentRole::IdFront),
            "ID_BACK" => Ok(DocumentRole::IdBack),
            "SELFIE" => Ok(DocumentRole::Selfie),
            "CLEARANCE" => Ok(DocumentRole::Clearance),
            "ADDRESS_PROOF" => Ok(DocumentRole::AddressProof),
            "BUSINESS_PERMIT" => Ok(DocumentRole::BusinessPermit),
            "REP_ID_FRONT" => Ok(DocumentRole::RepIdFront),
            "REP_ID_BACK" => Ok(DocumentRole::RepIdBack),
            "REP_SELFIE" => Ok(DocumentRole::RepSelfie),
            "AUTH_LETTER" => Ok(DocumentRole::AuthLetter),
            other => Err(ParseEnumError { kind: "document role", value: other.to_string() }),
        }
    }

    /// Roles that must show exactly one face
    pub fn requires_face(&self) -> bool {
        matches!(
            self,
            DocumentRole::IdFront
                | DocumentRole::Selfie
                | DocumentRole::RepIdFront
                | DocumentRole::RepSelfie
        )
    }

    /// Expected face count hint for the face detector (1 for ID/selfie
    /// roles, 0 for document-only roles)
    pub fn expected_face_count(&self) -> u32 {
        if self.requires_face() {
            1
        } else {
            0
        }
    }

    /// Minimum acceptable quality score for this role
    ///
    /// Face-bearing roles use the stricter minimum.
    pub fn min_quality(&self) -> f64 {
        if self.requires_face() {
            0.55
        } else {
            0.40
        }
    }

    /// Weight of this role in the aggregated submission confidence
    ///
    /// ID_FRONT 0.30, SELFIE 0.30, ID_BACK 0.15, CLEARANCE 0.15; remaining
    /// roles share the residual 0.10. Representative documents mirror the
    /// individual weights.
    pub fn confidence_weight(&self) -> f64 {
        match self {
            DocumentRole::IdFront | DocumentRole::RepIdFront => 0.30,
            DocumentRole::Selfie | DocumentRole::RepSelfie => 0.30,
            DocumentRole::IdBack | DocumentRole::RepIdBack => 0.15,
            DocumentRole::Clearance => 0.15,
            _ => 0.10,
        }
    }

    /// Whether OCR text is required to be non-empty for a PASSED verdict
    pub fn requires_ocr_text(&self) -> bool {
        matches!(
            self,
            DocumentRole::IdFront
                | DocumentRole::RepIdFront
                | DocumentRole::Clearance
                | DocumentRole::AddressProof
                | DocumentRole::BusinessPermit
        )
    }
}

/// AI verification status for one document's analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Pending,
    Passed,
    Warning,
    Failed,
    Skipped,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Passed => "PASSED",
            VerificationStatus::Warning => "WARNING",
            VerificationStatus::Failed => "FAILED",
            VerificationStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "PENDING" => Ok(VerificationStatus::Pending),
            "PASSED" => Ok(VerificationStatus::Passed),
            "WARNING" => Ok(VerificationStatus::Warning),
            "FAILED" => Ok(VerificationStatus::Failed),
            "SKIPPED" => Ok(VerificationStatus::Skipped),
            other => Err(ParseEnumError { kind: "verification status", value: other.to_string() }),
        }
    }
}

/// Closed rejection reason set
///
/// Every user-visible failure maps to one of these; internal errors are
/// never shown to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    NoFaceDetected,
    MultipleFaces,
    FaceTooSmall,
    MissingRequiredText,
    ImageTooBlurry,
    ResolutionTooLow,
    InvalidOrientation,
    UnreadableDocument,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::NoFaceDetected => "NO_FACE_DETECTED",
            RejectionReason::MultipleFaces => "MULTIPLE_FACES",
            RejectionReason::FaceTooSmall => "FACE_TOO_SMALL",
            RejectionReason::MissingRequiredText => "MISSING_REQUIRED_TEXT",
            RejectionReason::ImageTooBlurry => "IMAGE_TOO_BLURRY",
            RejectionReason::ResolutionTooLow => "RESOLUTION_TOO_LOW",
            RejectionReason::InvalidOrientation => "INVALID_ORIENTATION",
            RejectionReason::UnreadableDocument => "UNREADABLE_DOCUMENT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "NO_FACE_DETECTED" => Ok(RejectionReason::NoFaceDetected),
            "MULTIPLE_FACES" => Ok(RejectionReason::MultipleFaces),
            "FACE_TOO_SMALL" => Ok(RejectionReason::FaceTooSmall),
            "MISSING_REQUIRED_TEXT" => Ok(RejectionReason::MissingRequiredText),
            "IMAGE_TOO_BLURRY" => Ok(RejectionReason::ImageTooBlurry),
            "RESOLUTION_TOO_LOW" => Ok(RejectionReason::ResolutionTooLow),
            "INVALID_ORIENTATION" => Ok(RejectionReason::InvalidOrientation),
            "UNREADABLE_DOCUMENT" => Ok(RejectionReason::UnreadableDocument),
            other => Err(ParseEnumError { kind: "rejection reason", value: other.to_string() }),
        }
    }

    /// User-facing message for this reason
    pub fn user_message(&self) -> &'static str {
        match self {
            RejectionReason::NoFaceDetected => {
                "We could not detect a face in your photo. Please upload a clear, well-lit photo showing your face."
            }
            RejectionReason::MultipleFaces => {
                "More than one face was detected. Please upload a photo showing only your own face."
            }
            RejectionReason::FaceTooSmall => {
                "Your face appears too small in the photo. Please take the photo closer to the camera."
            }
            RejectionReason::MissingRequiredText => {
                "We could not find the required information on your document. Please upload a clear photo of the correct document."
            }
            RejectionReason::ImageTooBlurry => {
                "The photo is too blurry to verify. Please retake it with a steady hand and good lighting."
            }
            RejectionReason::ResolutionTooLow => {
                "The photo resolution is too low. Please upload a higher-quality image."
            }
            RejectionReason::InvalidOrientation => {
                "The document appears rotated or upside down. Please upload it right side up."
            }
            RejectionReason::UnreadableDocument => {
                "We could not read this document. Please upload a clear, uncorrupted image file."
            }
        }
    }

    /// Hard reasons force AUTO_REJECTED when they appear on a FAILED
    /// analysis of a required document
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            RejectionReason::NoFaceDetected
                | RejectionReason::MultipleFaces
                | RejectionReason::UnreadableDocument
                | RejectionReason::MissingRequiredText
        )
    }
}

/// Clearance document issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearanceType {
    Nbi,
    Police,
    None,
}

impl ClearanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearanceType::Nbi => "NBI",
            ClearanceType::Police => "POLICE",
            ClearanceType::None => "NONE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "NBI" => Ok(ClearanceType::Nbi),
            "POLICE" => Ok(ClearanceType::Police),
            "NONE" => Ok(ClearanceType::None),
            other => Err(ParseEnumError { kind: "clearance type", value: other.to_string() }),
        }
    }
}

/// Aggregate decision outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionOutcome {
    AutoApproved,
    AutoRejected,
    PendingHumanReview,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::AutoApproved => "AUTO_APPROVED",
            DecisionOutcome::AutoRejected => "AUTO_REJECTED",
            DecisionOutcome::PendingHumanReview => "PENDING_HUMAN_REVIEW",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "AUTO_APPROVED" => Ok(DecisionOutcome::AutoApproved),
            "AUTO_REJECTED" => Ok(DecisionOutcome::AutoRejected),
            "PENDING_HUMAN_REVIEW" => Ok(DecisionOutcome::PendingHumanReview),
            other => Err(ParseEnumError { kind: "decision outcome", value: other.to_string() }),
        }
    }
}

/// Immutable record of analyzer output for one document
///
/// Created exactly once per document and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Synthesized verdict for this document
    pub status: VerificationStatus,
    /// Whether a face was detected (None when not applicable to the role)
    pub face_detected: Option<bool>,
    /// Number of faces found
    pub face_count: u32,
    /// Detector confidence for the primary face (0.0-1.0)
    pub face_confidence: f64,
    /// Raw OCR text, truncated to [`OCR_TEXT_MAX_BYTES`]
    pub ocr_text: String,
    /// Mean OCR word confidence (0.0-1.0)
    pub ocr_confidence: f64,
    /// Combined image quality score (0.0-1.0)
    pub quality_score: f64,
    /// Overall analyzer confidence for this document (0.0-1.0)
    pub ai_confidence: f64,
    /// Closed rejection reason when status is FAILED or SKIPPED
    pub rejection_reason: Option<RejectionReason>,
    /// User-facing message for the rejection reason
    pub rejection_message: Option<String>,
    /// Non-fatal observations surfaced to reviewers
    pub warnings: Vec<String>,
    /// Free-form analyzer details (bounded; persisted as JSON)
    pub details: serde_json::Value,
    /// When the analysis completed
    pub verified_at: chrono::DateTime<chrono::Utc>,
}

impl Analysis {
    /// A SKIPPED analysis shell carrying a closed reason
    ///
    /// Used for storage failures, decode failures, and analyzer timeouts;
    /// these never abort sibling documents.
    pub fn skipped(reason: RejectionReason, warning: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Skipped,
            face_detected: None,
            face_count: 0,
            face_confidence: 0.0,
            ocr_text: String::new(),
            ocr_confidence: 0.0,
            quality_score: 0.0,
            ai_confidence: 0.0,
            rejection_reason: Some(reason),
            rejection_message: Some(reason.user_message().to_string()),
            warnings: vec![warning.into()],
            details: serde_json::json!({}),
            verified_at: chrono::Utc::now(),
        }
    }
}

/// Truncate OCR text to the persistence bound on a char boundary
pub fn truncate_ocr_text(text: &str) -> String {
    if text.len() <= OCR_TEXT_MAX_BYTES {
        return text.to_string();
    }
    let mut end = OCR_TEXT_MAX_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// A single extracted field with its confidence and the user-confirmed
/// counterpart set after review
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldValue {
    /// Extracted value; empty when extraction failed
    pub value: Option<String>,
    /// Extraction confidence; None (not 0.0) when the field was not
    /// extracted, since 0.0 is a legitimate low-confidence value
    pub confidence: Option<f64>,
    /// Value confirmed by the user or a reviewer
    pub confirmed: Option<String>,
}

impl FieldValue {
    pub fn extracted(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: Some(value.into()),
            confidence: Some(confidence),
            confirmed: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

/// Structured fields extracted from ID/clearance OCR text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub first_name: FieldValue,
    pub middle_name: FieldValue,
    pub last_name: FieldValue,
    pub birthdate: FieldValue,
    pub address: FieldValue,
    pub id_number: FieldValue,
    pub nationality: FieldValue,
    pub sex: FieldValue,
    pub place_of_birth: FieldValue,
    pub clearance_number: FieldValue,
    pub clearance_type: ClearanceType,
    pub clearance_issue_date: FieldValue,
    pub clearance_validity_date: FieldValue,
}

impl ExtractedFields {
    pub fn new() -> Self {
        Self {
            clearance_type: ClearanceType::None,
            ..Default::default()
        }
    }

    /// True when any field carries an extracted value
    pub fn any_extracted(&self) -> bool {
        [
            &self.first_name,
            &self.middle_name,
            &self.last_name,
            &self.birthdate,
            &self.address,
            &self.id_number,
            &self.nationality,
            &self.sex,
            &self.place_of_birth,
            &self.clearance_number,
            &self.clearance_issue_date,
            &self.clearance_validity_date,
        ]
        .iter()
        .any(|f| !f.is_empty())
    }
}

impl Default for ClearanceType {
    fn default() -> Self {
        ClearanceType::None
    }
}
