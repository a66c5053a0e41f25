//! Per-document verdict synthesis
//!
//! **[KYC-VF-010]** Table-driven policy over analyzer signals: each document
//! role has its own hard checks and warning conditions, and every failure
//! maps to the closed rejection-reason set. The role table is a closed match
//! on [`DocumentRole`], not open-ended dispatch.
//!
//! Clearance expiry boundary: PASSED with 30 or more days of validity left,
//! WARNING under 30 days, FAILED when expired or when the issuer keywords
//! are missing.

use crate::analyzers::DocumentSignals;
use crate::extractor::{clearance_keyword_present, clearance_validity};
use crate::types::{Analysis, DocumentRole, RejectionReason, VerificationStatus, truncate_ocr_text};
use chrono::{DateTime, Utc};

/// Days of remaining clearance validity below which a WARNING is raised
const CLEARANCE_WARNING_DAYS: i64 = 30;

/// OCR mean confidence below which a WARNING is raised on text-bearing roles
const OCR_LOW_CONFIDENCE: f64 = 0.50;

/// Business-permit keywords; at least one must appear
const PERMIT_KEYWORDS: [&str; 4] = [
    "BUSINESS PERMIT",
    "MAYOR'S PERMIT",
    "BUSINESS LICENSE",
    "PERMIT TO OPERATE",
];

/// Document verifier
pub struct DocumentVerifier;

impl DocumentVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Synthesize the Analysis verdict for one document
    pub fn verify(&self, role: DocumentRole, signals: &DocumentSignals, now: DateTime<Utc>) -> Analysis {
        // Unreadable bytes skip the document outright; siblings continue
        if signals.decode_error {
            let mut analysis = Analysis::skipped(
                RejectionReason::UnreadableDocument,
                "Image could not be decoded",
            );
            analysis.warnings.extend(signals.warnings.iter().cloned());
            return analysis;
        }

        let quality = match &signals.quality {
            Some(q) => q,
            None => {
                // Quality scoring timed out; without it no verdict is safe
                let mut analysis = Analysis::skipped(
                    RejectionReason::UnreadableDocument,
                    "Quality scoring unavailable",
                );
                analysis.warnings.extend(signals.warnings.iter().cloned());
                return analysis;
            }
        };

        let mut warnings: Vec<String> = signals.warnings.clone();
        let mut failure: Option<RejectionReason> = None;

        let face = signals.face.as_ref();
        let face_count = face.map(|f| f.face_count).unwrap_or(0);
        let face_confidence = face.map(|f| f.face_confidence).unwrap_or(0.0);
        let ocr_text = signals.ocr.text();
        let ocr_confidence = signals.ocr.mean_confidence();

        match role {
            DocumentRole::IdFront | DocumentRole::RepIdFront => {
                // Hard checks: exactly one face, quality at the face
                // minimum, and readable text
                match face.and_then(|f| f.issue) {
                    Some(RejectionReason::FaceTooSmall) => {
                        warnings.push("Face is small relative to the card".to_string());
                    }
                    Some(issue) => failure = Some(issue),
                    None => {
                        if face.is_none() {
                            warnings.push("Face detection unavailable".to_string());
                        }
                    }
                }
                if failure.is_none() && quality.overall < role.min_quality() {
                    failure = Some(
                        quality
                            .rejection
                            .unwrap_or(RejectionReason::ImageTooBlurry),
                    );
                }
                if failure.is_none() {
                    if !signals.ocr.is_available() {
                        warnings.push("OCR unavailable for this document".to_string());
                    } else if ocr_text.trim().is_empty() {
                        failure = Some(RejectionReason::MissingRequiredText);
                    } else if ocr_confidence < OCR_LOW_CONFIDENCE {
                        warnings.push(format!(
                            "Low OCR confidence ({:.2})",
                            ocr_confidence
                        ));
                    }
                }
            }

            DocumentRole::IdBack | DocumentRole::RepIdBack => {
                // Back side only needs to be readable; low quality warns
                if quality.overall < role.min_quality() {
                    warnings.push(format!(
                        "Low image quality ({:.2})",
                        quality.overall
                    ));
                }
            }

            DocumentRole::Selfie | DocumentRole::RepSelfie => {
                match face.and_then(|f| f.issue) {
                    Some(issue @ RejectionReason::NoFaceDetected)
                    | Some(issue @ RejectionReason::MultipleFaces) => failure = Some(issue),
                    Some(RejectionReason::FaceTooSmall) => {
                        warnings.push("Face is small in the selfie".to_string());
                    }
                    Some(issue) => failure = Some(issue),
                    None => {
                        if face.is_none() {
                            warnings.push("Face detection unavailable".to_string());
                        }
                    }
                }
                if failure.is_none() && quality.overall < role.min_quality() {
                    warnings.push(format!(
                        "Borderline selfie quality ({:.2})",
                        quality.overall
                    ));
                }
            }

            DocumentRole::Clearance => {
                if !signals.ocr.is_available() || ocr_text.trim().is_empty() {
                    failure = Some(RejectionReason::UnreadableDocument);
                } else if !clearance_keyword_present(ocr_text) {
                    failure = Some(RejectionReason::MissingRequiredText);
                } else {
                    match clearance_validity(ocr_text) {
                        Some(valid_until) => {
                            let days_left = (valid_until - now.date_naive()).num_days();
                            if days_left < 0 {
                                warnings.push(format!(
                                    "Clearance expired on {}",
                                    valid_until
                                ));
                                failure = Some(RejectionReason::MissingRequiredText);
                            } else if days_left < CLEARANCE_WARNING_DAYS {
                                warnings.push(format!(
                                    "Clearance expires in {} days",
                                    days_left
                                ));
                            }
                        }
                        None => {
                            failure = Some(RejectionReason::MissingRequiredText);
                        }
                    }
                }
            }

            DocumentRole::AddressProof => {
                if quality.overall < role.min_quality() {
                    failure = Some(
                        quality
                            .rejection
                            .unwrap_or(RejectionReason::ResolutionTooLow),
                    );
                } else if !signals.ocr.is_available() || ocr_text.trim().is_empty() {
                    failure = Some(RejectionReason::UnreadableDocument);
                } else if ocr_confidence < OCR_LOW_CONFIDENCE {
                    warnings.push(format!("Low OCR confidence ({:.2})", ocr_confidence));
                }
            }

            DocumentRole::BusinessPermit => {
                if quality.overall < role.min_quality() {
                    failure = Some(
                        quality
                            .rejection
                            .unwrap_or(RejectionReason::ResolutionTooLow),
                    );
                } else if !signals.ocr.is_available() || ocr_text.trim().is_empty() {
                    failure = Some(RejectionReason::UnreadableDocument);
                } else if !permit_keyword_present(ocr_text) {
                    failure = Some(RejectionReason::MissingRequiredText);
                } else if ocr_confidence < OCR_LOW_CONFIDENCE {
                    warnings.push(format!("Low OCR confidence ({:.2})", ocr_confidence));
                }
            }

            DocumentRole::AuthLetter => {
                if quality.overall < role.min_quality() {
                    warnings.push(format!("Low image quality ({:.2})", quality.overall));
                }
            }
        }

        let status = match failure {
            Some(_) => VerificationStatus::Failed,
            None if warnings.is_empty() => VerificationStatus::Passed,
            None => VerificationStatus::Warning,
        };

        let ai_confidence = document_confidence(role, face_confidence, quality.overall, ocr_confidence);

        Analysis {
            status,
            face_detected: if role.requires_face() {
                Some(face_count > 0)
            } else {
                None
            },
            face_count,
            face_confidence,
            ocr_text: truncate_ocr_text(ocr_text),
            ocr_confidence,
            quality_score: quality.overall,
            ai_confidence,
            rejection_reason: failure,
            rejection_message: failure.map(|r| r.user_message().to_string()),
            warnings,
            details: serde_json::json!({
                "resolution_score": quality.resolution_score,
                "blur_score": quality.blur_score,
                "exposure_score": quality.exposure_score,
                "width": quality.width,
                "height": quality.height,
                "face_backend": face.map(|f| f.backend),
            }),
            verified_at: now,
        }
    }
}

impl Default for DocumentVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn permit_keyword_present(text: &str) -> bool {
    let upper = text.to_uppercase();
    PERMIT_KEYWORDS.iter().any(|k| upper.contains(k))
}

/// Per-document confidence from the available signal mix
///
/// Face roles lean on the detector, text roles on OCR; failed documents
/// still report their raw combined signal so reviewers see how close the
/// call was.
fn document_confidence(role: DocumentRole, face: f64, quality: f64, ocr: f64) -> f64 {
    match role {
        DocumentRole::IdFront | DocumentRole::RepIdFront => {
            face * 0.40 + quality * 0.30 + ocr * 0.30
        }
        DocumentRole::Selfie | DocumentRole::RepSelfie => face * 0.60 + quality * 0.40,
        DocumentRole::IdBack | DocumentRole::RepIdBack | DocumentRole::AuthLetter => {
            quality * 0.70 + ocr * 0.30
        }
        DocumentRole::Clearance
        | DocumentRole::AddressProof
        | DocumentRole::BusinessPermit => quality * 0.40 + ocr * 0.60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::{FaceDetection, OcrOutcome, OcrText, QualityReport};
    use chrono::Duration;

    fn quality(overall: f64) -> QualityReport {
        QualityReport {
            resolution_score: overall,
            blur_score: overall,
            exposure_score: overall,
            overall,
            width: 800,
            height: 600,
            rejection: if overall < 0.40 {
                Some(RejectionReason::ImageTooBlurry)
            } else {
                None
            },
            warnings: vec![],
        }
    }

    fn one_face(confidence: f64) -> FaceDetection {
        FaceDetection {
            face_count: 1,
            face_confidence: confidence,
            descriptor: Some(vec![0.1; 128]),
            primary_area_fraction: Some(0.3),
            issue: None,
            warnings: vec![],
            backend: "stub",
        }
    }

    fn ocr_text(text: &str, confidence: f64) -> OcrOutcome {
        OcrOutcome::Text(OcrText {
            text: text.to_string(),
            mean_confidence: confidence,
            word_count: text.split_whitespace().count(),
            warnings: vec![],
        })
    }

    fn signals(
        quality_report: Option<QualityReport>,
        face: Option<FaceDetection>,
        ocr: OcrOutcome,
    ) -> DocumentSignals {
        DocumentSignals {
            quality: quality_report,
            decode_error: false,
            face,
            ocr,
            warnings: vec![],
        }
    }

    #[test]
    fn test_id_front_passes_clean() {
        let verifier = DocumentVerifier::new();
        let analysis = verifier.verify(
            DocumentRole::IdFront,
            &signals(
                Some(quality(0.82)),
                Some(one_face(0.9)),
                ocr_text("SURNAME: DELA CRUZ", 0.88),
            ),
            Utc::now(),
        );

        assert_eq!(analysis.status, VerificationStatus::Passed);
        assert!(analysis.rejection_reason.is_none());
        assert_eq!(analysis.face_detected, Some(true));
        assert!(analysis.ai_confidence > 0.8);
    }

    #[test]
    fn test_id_front_fails_no_face() {
        let verifier = DocumentVerifier::new();
        let mut face = one_face(0.0);
        face.face_count = 0;
        face.descriptor = None;
        face.issue = Some(RejectionReason::NoFaceDetected);

        let analysis = verifier.verify(
            DocumentRole::IdFront,
            &signals(Some(quality(0.82)), Some(face), ocr_text("TEXT", 0.9)),
            Utc::now(),
        );

        assert_eq!(analysis.status, VerificationStatus::Failed);
        assert_eq!(analysis.rejection_reason, Some(RejectionReason::NoFaceDetected));
        assert!(analysis.rejection_message.is_some());
    }

    #[test]
    fn test_id_front_fails_empty_ocr() {
        let verifier = DocumentVerifier::new();
        let analysis = verifier.verify(
            DocumentRole::IdFront,
            &signals(Some(quality(0.82)), Some(one_face(0.9)), ocr_text("", 0.0)),
            Utc::now(),
        );

        assert_eq!(analysis.status, VerificationStatus::Failed);
        assert_eq!(
            analysis.rejection_reason,
            Some(RejectionReason::MissingRequiredText)
        );
    }

    #[test]
    fn test_id_front_face_too_small_is_warning() {
        let verifier = DocumentVerifier::new();
        let mut face = one_face(0.8);
        face.primary_area_fraction = Some(0.04);
        face.issue = Some(RejectionReason::FaceTooSmall);

        let analysis = verifier.verify(
            DocumentRole::IdFront,
            &signals(Some(quality(0.82)), Some(face), ocr_text("TEXT", 0.9)),
            Utc::now(),
        );

        assert_eq!(analysis.status, VerificationStatus::Warning);
        assert!(analysis.rejection_reason.is_none());
    }

    #[test]
    fn test_quality_boundary_exactly_at_minimum_passes() {
        let verifier = DocumentVerifier::new();
        let analysis = verifier.verify(
            DocumentRole::IdFront,
            &signals(
                Some(quality(0.55)),
                Some(one_face(0.9)),
                ocr_text("TEXT", 0.9),
            ),
            Utc::now(),
        );
        assert_eq!(analysis.status, VerificationStatus::Passed);
    }

    #[test]
    fn test_id_back_low_quality_warns_instead_of_failing() {
        let verifier = DocumentVerifier::new();
        let analysis = verifier.verify(
            DocumentRole::IdBack,
            &signals(Some(quality(0.30)), None, ocr_text("BACK", 0.6)),
            Utc::now(),
        );
        assert_eq!(analysis.status, VerificationStatus::Warning);
        assert!(analysis.rejection_reason.is_none());
    }

    #[test]
    fn test_selfie_multiple_faces_fails() {
        let verifier = DocumentVerifier::new();
        let mut face = one_face(0.9);
        face.face_count = 2;
        face.issue = Some(RejectionReason::MultipleFaces);

        let analysis = verifier.verify(
            DocumentRole::Selfie,
            &signals(
                Some(quality(0.78)),
                Some(face),
                OcrOutcome::Unavailable {
                    reason: "not applicable".to_string(),
                },
            ),
            Utc::now(),
        );

        assert_eq!(analysis.status, VerificationStatus::Failed);
        assert_eq!(analysis.rejection_reason, Some(RejectionReason::MultipleFaces));
    }

    #[test]
    fn test_decode_error_skips() {
        let verifier = DocumentVerifier::new();
        let mut sig = signals(None, None, OcrOutcome::Unavailable { reason: "x".into() });
        sig.decode_error = true;

        let analysis = verifier.verify(DocumentRole::IdBack, &sig, Utc::now());
        assert_eq!(analysis.status, VerificationStatus::Skipped);
        assert_eq!(
            analysis.rejection_reason,
            Some(RejectionReason::UnreadableDocument)
        );
    }

    #[test]
    fn test_clearance_valid_passes() {
        let verifier = DocumentVerifier::new();
        let now = Utc::now();
        let valid_until = (now + Duration::days(180)).format("%Y-%m-%d").to_string();
        let text = format!("NBI CLEARANCE\nVALID UNTIL: {}", valid_until);

        let analysis = verifier.verify(
            DocumentRole::Clearance,
            &signals(Some(quality(0.7)), None, ocr_text(&text, 0.9)),
            now,
        );
        assert_eq!(analysis.status, VerificationStatus::Passed);
    }

    #[test]
    fn test_clearance_expiry_boundaries() {
        let verifier = DocumentVerifier::new();
        let now = Utc::now();

        // Exactly 30 days out: PASSED
        let at_30 = (now + Duration::days(30)).format("%Y-%m-%d").to_string();
        let analysis = verifier.verify(
            DocumentRole::Clearance,
            &signals(
                Some(quality(0.7)),
                None,
                ocr_text(&format!("NBI CLEARANCE\nVALID UNTIL: {}", at_30), 0.9),
            ),
            now,
        );
        assert_eq!(analysis.status, VerificationStatus::Passed);

        // 29 days out: WARNING
        let at_29 = (now + Duration::days(29)).format("%Y-%m-%d").to_string();
        let analysis = verifier.verify(
            DocumentRole::Clearance,
            &signals(
                Some(quality(0.7)),
                None,
                ocr_text(&format!("NBI CLEARANCE\nVALID UNTIL: {}", at_29), 0.9),
            ),
            now,
        );
        assert_eq!(analysis.status, VerificationStatus::Warning);

        // Expired: FAILED
        let past = (now - Duration::days(5)).format("%Y-%m-%d").to_string();
        let analysis = verifier.verify(
            DocumentRole::Clearance,
            &signals(
                Some(quality(0.7)),
                None,
                ocr_text(&format!("NBI CLEARANCE\nVALID UNTIL: {}", past), 0.9),
            ),
            now,
        );
        assert_eq!(analysis.status, VerificationStatus::Failed);
        assert_eq!(
            analysis.rejection_reason,
            Some(RejectionReason::MissingRequiredText)
        );
    }

    #[test]
    fn test_clearance_missing_keywords_fails() {
        let verifier = DocumentVerifier::new();
        let analysis = verifier.verify(
            DocumentRole::Clearance,
            &signals(
                Some(quality(0.7)),
                None,
                ocr_text("SOME OTHER DOCUMENT\nVALID UNTIL: 2030-01-01", 0.9),
            ),
            Utc::now(),
        );
        assert_eq!(analysis.status, VerificationStatus::Failed);
        assert_eq!(
            analysis.rejection_reason,
            Some(RejectionReason::MissingRequiredText)
        );
    }

    #[test]
    fn test_business_permit_keywords() {
        let verifier = DocumentVerifier::new();

        let good = verifier.verify(
            DocumentRole::BusinessPermit,
            &signals(
                Some(quality(0.6)),
                None,
                ocr_text("CITY OF MANILA\nMAYOR'S PERMIT\n2026", 0.85),
            ),
            Utc::now(),
        );
        assert_eq!(good.status, VerificationStatus::Passed);

        let bad = verifier.verify(
            DocumentRole::BusinessPermit,
            &signals(
                Some(quality(0.6)),
                None,
                ocr_text("RECEIPT FOR GOODS\nTOTAL: 500", 0.85),
            ),
            Utc::now(),
        );
        assert_eq!(bad.status, VerificationStatus::Failed);
        assert_eq!(
            bad.rejection_reason,
            Some(RejectionReason::MissingRequiredText)
        );
    }

    #[test]
    fn test_auth_letter_low_quality_warns() {
        let verifier = DocumentVerifier::new();
        let analysis = verifier.verify(
            DocumentRole::AuthLetter,
            &signals(
                Some(quality(0.30)),
                None,
                OcrOutcome::Unavailable { reason: "skip".into() },
            ),
            Utc::now(),
        );
        assert_eq!(analysis.status, VerificationStatus::Warning);
    }

    #[test]
    fn test_ocr_text_truncated_at_persistence_bound() {
        let verifier = DocumentVerifier::new();
        let long_text = format!("NBI CLEARANCE\nVALID UNTIL: 2030-01-01\n{}", "x".repeat(8000));
        let analysis = verifier.verify(
            DocumentRole::Clearance,
            &signals(Some(quality(0.7)), None, ocr_text(&long_text, 0.9)),
            Utc::now(),
        );
        assert!(analysis.ocr_text.len() <= crate::types::OCR_TEXT_MAX_BYTES);
    }
}
