//! 1:1 face matching
//!
//! **[KYC-FM-010]** Compares the ID-embedded face descriptor against the
//! selfie descriptor. The metric is cosine similarity over unit-normalized
//! descriptors, affinely mapped from [-1, 1] to [0, 1]; every threshold in
//! the policy is calibrated against this mapping and no other metric is
//! used anywhere in the pipeline.

/// Face matcher
pub struct FaceMatcher;

impl FaceMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Similarity in [0, 1] between two descriptors
    ///
    /// Returns `None` when either descriptor is absent, dimensions differ,
    /// or a descriptor has zero magnitude; callers mark the face match
    /// SKIPPED and never auto-approve on a `None`.
    pub fn similarity(&self, id_descriptor: Option<&[f32]>, selfie_descriptor: Option<&[f32]>) -> Option<f64> {
        let a = id_descriptor?;
        let b = selfie_descriptor?;
        if a.len() != b.len() || a.is_empty() {
            return None;
        }

        let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
        let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if norm_a < f64::EPSILON || norm_b < f64::EPSILON {
            return None;
        }

        let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
        Some((cosine + 1.0) / 2.0)
    }
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a descriptor pair whose similarity under [`FaceMatcher`] equals
/// `target` — used by tests to exercise threshold boundaries exactly.
#[cfg(test)]
pub fn descriptor_pair_with_similarity(target: f64) -> (Vec<f32>, Vec<f32>) {
    let cosine = (2.0 * target - 1.0).clamp(-1.0, 1.0);
    let a = vec![1.0f32, 0.0];
    let b = vec![cosine as f32, (1.0 - cosine * cosine).sqrt() as f32];
    (a, b)
}
