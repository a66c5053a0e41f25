//! Image quality scoring
//!
//! **[KYC-AN-030]** Derives a scalar in [0,1] from resolution, blur
//! estimate, and exposure. Pure and deterministic: scoring the same bytes
//! twice produces identical results.
//!
//! Blur is estimated with variance-of-Laplacian on the grayscale image.
//! Thresholds follow document-scanning practice: variance under ~100 reads
//! as blurry, sharp document text sits above ~500.

use crate::types::{DocumentRole, RejectionReason};
use image::GrayImage;
use thiserror::Error;

/// Laplacian variance at (or above) which blur score saturates at 1.0
const SHARP_VARIANCE: f64 = 500.0;

/// Shorter-edge pixel target for face-bearing roles
const FACE_TARGET_EDGE: u32 = 600;

/// Shorter-edge pixel target for document-only roles
const DOC_TARGET_EDGE: u32 = 480;

/// Images larger than this edge are sampled down (integer stride) before
/// the Laplacian pass to bound CPU per call
const MAX_ANALYSIS_EDGE: u32 = 1024;

/// Below half the target edge the image is rejected outright; sharpness
/// and exposure cannot compensate for missing pixels
const RESOLUTION_FLOOR: f64 = 0.5;

/// Quality scoring errors
#[derive(Debug, Error)]
pub enum QualityError {
    /// Input bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Image dimensions are degenerate (zero-sized)
    #[error("Degenerate image dimensions: {width}x{height}")]
    Degenerate { width: u32, height: u32 },
}

/// Result of quality scoring for one document image
#[derive(Debug, Clone)]
pub struct QualityReport {
    /// Piecewise-linear resolution score (0.0-1.0)
    pub resolution_score: f64,
    /// Normalized variance-of-Laplacian blur score (0.0-1.0)
    pub blur_score: f64,
    /// Mean-brightness distance from mid-gray, normalized (0.0-1.0)
    pub exposure_score: f64,
    /// Combined quality score (0.0-1.0)
    pub overall: f64,
    /// Source image width in pixels
    pub width: u32,
    /// Source image height in pixels
    pub height: u32,
    /// Set when overall falls below the role minimum
    pub rejection: Option<RejectionReason>,
    /// Non-fatal observations
    pub warnings: Vec<String>,
}

/// Quality scorer service
pub struct QualityScorer {
    /// Weight of the resolution component
    resolution_weight: f64,
    /// Weight of the blur component
    blur_weight: f64,
    /// Weight of the exposure component
    exposure_weight: f64,
}

impl QualityScorer {
    pub fn new() -> Self {
        Self {
            resolution_weight: 0.40,
            blur_weight: 0.35,
            exposure_weight: 0.25,
        }
    }

    /// Score image bytes for the given document role
    ///
    /// # Errors
    /// Returns `QualityError::Decode` when the bytes are not an image; the
    /// caller maps this to a SKIPPED analysis with UNREADABLE_DOCUMENT.
    pub fn score(&self, bytes: &[u8], role: DocumentRole) -> Result<QualityReport, QualityError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| QualityError::Decode(e.to_string()))?;

        let gray = decoded.to_luma8();
        let (width, height) = (gray.width(), gray.height());
        if width == 0 || height == 0 {
            return Err(QualityError::Degenerate { width, height });
        }

        let sampled = sample_down(&gray, MAX_ANALYSIS_EDGE);

        let resolution_score = resolution_score(width, height, target_edge(role));
        let blur_score = (laplacian_variance(&sampled) / SHARP_VARIANCE).clamp(0.0, 1.0);
        let exposure_score = exposure_score(&sampled);

        let overall = resolution_score * self.resolution_weight
            + blur_score * self.blur_weight
            + exposure_score * self.exposure_weight;

        let mut warnings = Vec::new();
        let mut rejection = None;

        if resolution_score < RESOLUTION_FLOOR {
            rejection = Some(RejectionReason::ResolutionTooLow);
        } else if overall < role.min_quality() {
            // Attribute the failure to the weakest hard component
            rejection = if blur_score <= resolution_score {
                Some(RejectionReason::ImageTooBlurry)
            } else {
                Some(RejectionReason::ResolutionTooLow)
            };
        } else {
            if blur_score < 0.3 {
                warnings.push(format!("Image is soft (blur score {:.2})", blur_score));
            }
            if exposure_score < 0.4 {
                warnings.push(format!(
                    "Image is poorly exposed (exposure score {:.2})",
                    exposure_score
                ));
            }
        }

        tracing::debug!(
            role = role.as_str(),
            width,
            height,
            resolution = resolution_score,
            blur = blur_score,
            exposure = exposure_score,
            overall,
            "Quality scoring complete"
        );

        Ok(QualityReport {
            resolution_score,
            blur_score,
            exposure_score,
            overall,
            width,
            height,
            rejection,
            warnings,
        })
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn target_edge(role: DocumentRole) -> u32 {
    if role.requires_face() {
        FACE_TARGET_EDGE
    } else {
        DOC_TARGET_EDGE
    }
}

/// Piecewise-linear resolution score against the role's shorter-edge target
fn resolution_score(width: u32, height: u32, target_edge: u32) -> f64 {
    let edge = width.min(height) as f64;
    (edge / target_edge as f64).clamp(0.0, 1.0)
}

/// Integer-stride downsample; deterministic, no interpolation
fn sample_down(gray: &GrayImage, max_edge: u32) -> GrayImage {
    let (w, h) = (gray.width(), gray.height());
    let longest = w.max(h);
    if longest <= max_edge {
        return gray.clone();
    }
    let stride = longest.div_ceil(max_edge);
    let (nw, nh) = (w / stride, h / stride);
    let mut out = GrayImage::new(nw.max(1), nh.max(1));
    for y in 0..out.height() {
        for x in 0..out.width() {
            out.put_pixel(x, y, *gray.get_pixel(x * stride, y * stride));
        }
    }
    out
}

/// Variance of the 3x3 Laplacian response; higher = sharper
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (gray.width(), gray.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
    let mut responses = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            responses.push(lap);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

/// Mean-brightness distance from mid-gray (128), normalized to [0,1]
fn exposure_score(gray: &GrayImage) -> f64 {
    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let mean = sum as f64 / (gray.width() as u64 * gray.height() as u64) as f64;
    1.0 - ((mean - 128.0).abs() / 128.0)
}
