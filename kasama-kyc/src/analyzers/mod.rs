//! Image analyzers
//!
//! **[KYC-AN-001]** Pure, stateless transformations over raw bytes: face
//! detection, OCR, and quality scoring. The per-document entry point
//! [`AnalyzerSet::analyze_document`] runs all three concurrently under
//! per-call deadlines; a timed-out analyzer yields a skip-equivalent
//! signal with a warning, never an unhandled failure.

pub mod face;
pub mod ocr;
pub mod quality;

pub use face::{FaceBackend, FaceDetection, FaceError, HeuristicFaceBackend, RemoteFaceBackend};
pub use ocr::{OcrEngine, OcrOutcome, OcrText, TextRecognizer};
pub use quality::{QualityError, QualityReport, QualityScorer};

use crate::config::AnalyzerDeadlines;
use crate::types::DocumentRole;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Face detection engine: remote backend with local fallback
///
/// The model is shared and read-only; concurrent inference is bounded by a
/// semaphore sized to available CPUs since backend thread safety is not
/// guaranteed everywhere.
pub struct FaceEngine {
    local: Arc<dyn FaceBackend>,
    remote: Option<Arc<dyn FaceBackend>>,
    inference_permits: Semaphore,
}

impl FaceEngine {
    pub fn new(local: Arc<dyn FaceBackend>, remote: Option<Arc<dyn FaceBackend>>) -> Self {
        let permits = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            local,
            remote,
            inference_permits: Semaphore::new(permits),
        }
    }

    /// Detect faces, preferring the remote backend when configured
    ///
    /// Remote failures degrade to the local backend with a warning attached
    /// to the result; only a local decode failure surfaces as an error.
    pub async fn detect(
        &self,
        bytes: &[u8],
        expected_faces: u32,
    ) -> Result<FaceDetection, FaceError> {
        let _permit = self
            .inference_permits
            .acquire()
            .await
            .map_err(|e| FaceError::Model(e.to_string()))?;

        if let Some(remote) = &self.remote {
            match remote.detect(bytes, expected_faces).await {
                Ok(detection) => return Ok(detection.with_expectation(expected_faces)),
                Err(e) => {
                    tracing::warn!(error = %e, "Remote face service failed, falling back to local backend");
                }
            }
        }

        let mut detection = self.local.detect(bytes, expected_faces).await?;
        if self.remote.is_some() {
            detection
                .warnings
                .push("Remote face service unavailable; local fallback used".to_string());
        }
        Ok(detection.with_expectation(expected_faces))
    }
}

/// Raw analyzer signals for one document, consumed by the verifier
#[derive(Debug)]
pub struct DocumentSignals {
    /// Quality report; None when scoring timed out
    pub quality: Option<QualityReport>,
    /// The image bytes could not be decoded at all
    pub decode_error: bool,
    /// Face detection result; None when the role carries no face, the call
    /// timed out, or decode failed
    pub face: Option<FaceDetection>,
    /// OCR outcome (Unavailable when skipped or timed out)
    pub ocr: OcrOutcome,
    /// Warnings accumulated across analyzers (timeouts included)
    pub warnings: Vec<String>,
}

/// The analyzer bundle for one service instance
pub struct AnalyzerSet {
    face_engine: Arc<FaceEngine>,
    ocr_engine: Arc<dyn TextRecognizer>,
    quality_scorer: Arc<QualityScorer>,
    deadlines: AnalyzerDeadlines,
}

impl AnalyzerSet {
    pub fn new(
        face_engine: Arc<FaceEngine>,
        ocr_engine: Arc<dyn TextRecognizer>,
        deadlines: AnalyzerDeadlines,
    ) -> Self {
        Self {
            face_engine,
            ocr_engine,
            quality_scorer: Arc::new(QualityScorer::new()),
            deadlines,
        }
    }

    /// Run all applicable analyzers over one document concurrently
    ///
    /// **[KYC-AN-050]** Per-call deadlines: OCR, face, and quality each get
    /// their configured timeout. Timeouts and backend failures degrade to
    /// skip-equivalent signals; siblings are unaffected.
    pub async fn analyze_document(&self, bytes: &[u8], role: DocumentRole) -> DocumentSignals {
        let mut warnings = Vec::new();

        let quality_fut = async {
            let scorer = Arc::clone(&self.quality_scorer);
            let owned = bytes.to_vec();
            timeout(
                self.deadlines.quality,
                tokio::task::spawn_blocking(move || scorer.score(&owned, role)),
            )
            .await
        };

        let face_fut = async {
            if role.expected_face_count() == 0 {
                return None;
            }
            Some(
                timeout(
                    self.deadlines.face,
                    self.face_engine.detect(bytes, role.expected_face_count()),
                )
                .await,
            )
        };

        let ocr_fut = async {
            if matches!(role, DocumentRole::Selfie | DocumentRole::RepSelfie) {
                // Selfies carry no machine-readable text
                return None;
            }
            Some(timeout(self.deadlines.ocr, self.ocr_engine.recognize(bytes)).await)
        };

        let (quality_res, face_res, ocr_res) = tokio::join!(quality_fut, face_fut, ocr_fut);

        // Quality
        let mut decode_error = false;
        let quality = match quality_res {
            Ok(Ok(Ok(report))) => Some(report),
            Ok(Ok(Err(err))) => {
                // Decode and degenerate-dimension failures both mean the
                // bytes are not a usable image
                decode_error = true;
                warnings.push(format!("Image decode failed: {}", err));
                None
            }
            Ok(Err(join_err)) => {
                warnings.push(format!("Quality scoring crashed: {}", join_err));
                None
            }
            Err(_) => {
                warnings.push("Quality scoring timed out".to_string());
                None
            }
        };

        // Face
        let face = match face_res {
            None => None,
            Some(Ok(Ok(detection))) => {
                warnings.extend(detection.warnings.iter().cloned());
                Some(detection)
            }
            Some(Ok(Err(FaceError::Decode(e)))) => {
                decode_error = true;
                warnings.push(format!("Face detector could not decode image: {}", e));
                None
            }
            Some(Ok(Err(e))) => {
                warnings.push(format!("Face detection unavailable: {}", e));
                None
            }
            Some(Err(_)) => {
                warnings.push("Face detection timed out".to_string());
                None
            }
        };

        // OCR
        let ocr = match ocr_res {
            None => OcrOutcome::Unavailable {
                reason: "OCR not applicable for this role".to_string(),
            },
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => {
                warnings.push("OCR timed out".to_string());
                OcrOutcome::Unavailable {
                    reason: "OCR timed out".to_string(),
                }
            }
        };

        DocumentSignals {
            quality,
            decode_error,
            face,
            ocr,
            warnings,
        }
    }
}
