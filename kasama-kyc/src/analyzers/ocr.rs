//! OCR text extraction
//!
//! **[KYC-AN-020]** Shells out to the `tesseract` command-line tool with TSV
//! output. Missing or misconfigured binaries degrade to an `Unavailable`
//! outcome instead of failing the submission; `recognize` never errors.

use serde::Serialize;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// Internal OCR errors; callers only ever see [`OcrOutcome`]
#[derive(Debug, Error)]
enum OcrError {
    #[error("Failed to execute tesseract: {0}")]
    Execution(String),

    #[error("tesseract failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recognized text with confidence
#[derive(Debug, Clone, Serialize)]
pub struct OcrText {
    /// Raw recognized text (untruncated; persistence applies the bound)
    pub text: String,
    /// Mean word confidence (0.0-1.0)
    pub mean_confidence: f64,
    /// Number of recognized words
    pub word_count: usize,
    /// Non-fatal observations
    pub warnings: Vec<String>,
}

/// OCR outcome: text, or an explanation of why OCR was skipped
#[derive(Debug, Clone)]
pub enum OcrOutcome {
    Text(OcrText),
    /// OCR could not run; treated as SKIPPED-equivalent downstream
    Unavailable { reason: String },
}

impl OcrOutcome {
    pub fn text(&self) -> &str {
        match self {
            OcrOutcome::Text(t) => &t.text,
            OcrOutcome::Unavailable { .. } => "",
        }
    }

    pub fn mean_confidence(&self) -> f64 {
        match self {
            OcrOutcome::Text(t) => t.mean_confidence,
            OcrOutcome::Unavailable { .. } => 0.0,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, OcrOutcome::Text(_))
    }
}

/// Seam for text recognition backends
///
/// The production implementation shells out to tesseract; tests script
/// outcomes per document.
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in image bytes; must never error
    async fn recognize(&self, bytes: &[u8]) -> OcrOutcome;
}

/// OCR engine
///
/// Availability is probed once at construction; an unavailable engine still
/// accepts calls and returns `Unavailable` outcomes.
pub struct OcrEngine {
    binary_path: String,
    available: bool,
}

impl OcrEngine {
    /// Probe for the tesseract binary in PATH
    pub fn discover() -> Self {
        let binary_path = "tesseract".to_string();
        let available = match Command::new(&binary_path).arg("--version").output() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "tesseract not found; OCR will be skipped for all documents"
                );
                false
            }
        };
        Self {
            binary_path,
            available,
        }
    }

    /// Engine with an explicit binary path (tests, custom installs)
    pub fn with_binary(binary_path: impl Into<String>, available: bool) -> Self {
        Self {
            binary_path: binary_path.into(),
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Recognize text in image bytes
    ///
    /// Never errors: decode problems, binary failures, and malformed output
    /// all map to `Unavailable` with a reason.
    pub async fn recognize(&self, bytes: &[u8]) -> OcrOutcome {
        if !self.available {
            return OcrOutcome::Unavailable {
                reason: "tesseract binary not found in PATH".to_string(),
            };
        }
        if bytes.is_empty() {
            return OcrOutcome::Unavailable {
                reason: "empty image payload".to_string(),
            };
        }

        let binary = self.binary_path.clone();
        let bytes = bytes.to_vec();
        let result = tokio::task::spawn_blocking(move || run_tesseract(&binary, &bytes)).await;

        match result {
            Ok(Ok(text)) => OcrOutcome::Text(text),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "OCR failed; continuing without text");
                OcrOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "OCR task join failure");
                OcrOutcome::Unavailable {
                    reason: format!("Task join error: {}", e),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl TextRecognizer for OcrEngine {
    async fn recognize(&self, bytes: &[u8]) -> OcrOutcome {
        // Inherent method takes precedence; no recursion
        OcrEngine::recognize(self, bytes).await
    }
}

/// Run tesseract over a temp file and parse its TSV output
fn run_tesseract(binary: &str, bytes: &[u8]) -> Result<OcrText, OcrError> {
    // Keep the extension tesseract expects for the container format
    let ext = infer::get(bytes)
        .map(|k| k.extension())
        .unwrap_or("png");
    let temp_input: PathBuf =
        std::env::temp_dir().join(format!("kyc_ocr_{}.{}", uuid::Uuid::new_v4(), ext));
    std::fs::write(&temp_input, bytes)?;

    // Usage: tesseract input stdout --psm 3 tsv
    let output = Command::new(binary)
        .arg(&temp_input)
        .arg("stdout")
        .arg("--psm")
        .arg("3")
        .arg("tsv")
        .output();

    // Clean up temp file regardless of outcome
    let _ = std::fs::remove_file(&temp_input);

    let output = output.map_err(|e| OcrError::Execution(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::Failed(format!(
            "Exit code: {:?}, stderr: {}",
            output.status.code(),
            stderr
        )));
    }

    let tsv = String::from_utf8_lossy(&output.stdout);
    Ok(parse_tsv(&tsv))
}

/// Parse tesseract TSV output into text plus mean word confidence
///
/// TSV columns: level page_num block_num par_num line_num word_num left top
/// width height conf text. Word rows have level 5 and conf >= 0; header and
/// structural rows are skipped.
fn parse_tsv(tsv: &str) -> OcrText {
    let mut words: Vec<&str> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_line_key = (0u32, 0u32, 0u32);
    let mut current_line: Vec<&str> = Vec::new();
    let mut warnings = Vec::new();

    for (i, row) in tsv.lines().enumerate() {
        if i == 0 {
            // Header row
            continue;
        }
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        if cols[0] != "5" {
            continue;
        }
        let conf: f64 = match cols[10].parse() {
            Ok(c) => c,
            Err(_) => {
                warnings.push(format!("Unparseable confidence in TSV row {}", i));
                continue;
            }
        };
        if conf < 0.0 {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        let line_key = (
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        if line_key != current_line_key && !current_line.is_empty() {
            lines.push(current_line.join(" "));
            current_line.clear();
        }
        current_line_key = line_key;
        current_line.push(word);
        words.push(word);
        confidences.push(conf);
    }
    if !current_line.is_empty() {
        lines.push(current_line.join(" "));
    }

    let mean_confidence = if confidences.is_empty() {
        0.0
    } else {
        (confidences.iter().sum::<f64>() / confidences.len() as f64) / 100.0
    };

    OcrText {
        text: lines.join("\n"),
        mean_confidence,
        word_count: words.len(),
        warnings,
    }
}
