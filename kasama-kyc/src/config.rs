//! Configuration for the KYC verification service
//!
//! **[KYC-CFG-010]** Environment-driven policy thresholds and analyzer
//! deadlines. The policy is loaded once at startup and copied by value into
//! each submission's evaluation; reloads happen between submissions, never
//! during one.

use kasama_common::config::{env_bool, env_f64, env_u64};
use std::time::Duration;

/// Auto-approval policy snapshot
///
/// Thresholds gate the decision engine. Exactly-equal-to-threshold is
/// treated as passing everywhere.
#[derive(Debug, Clone)]
pub struct KycPolicy {
    /// Master switch for AUTO_APPROVED outcomes. Default false: deployments
    /// opt in explicitly; with the switch off, eligible submissions go to
    /// human review and auto-rejection still applies.
    pub auto_approve_enabled: bool,
    /// Minimum aggregated confidence for auto-approval
    pub auto_approve_min_confidence: f64,
    /// Minimum ID-to-selfie similarity for auto-approval
    pub face_match_min_similarity: f64,
    /// Similarities in the open interval (min, min + band) go to human
    /// review to absorb calibration drift
    pub similarity_drift_band: f64,
    /// When true, auto-approval additionally requires the user to have
    /// confirmed the extracted fields
    pub require_user_confirmation: bool,
    /// Minimum wait before a rejected owner may re-submit
    pub retry_cooldown: Duration,
}

impl Default for KycPolicy {
    fn default() -> Self {
        Self {
            auto_approve_enabled: false,
            auto_approve_min_confidence: 0.90,
            face_match_min_similarity: 0.85,
            similarity_drift_band: 0.05,
            require_user_confirmation: true,
            retry_cooldown: Duration::from_secs(86_400),
        }
    }
}

impl KycPolicy {
    /// Load policy from environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_approve_enabled: env_bool("KYC_AUTO_APPROVE_ENABLED", defaults.auto_approve_enabled),
            auto_approve_min_confidence: env_f64(
                "AUTO_APPROVE_MIN_CONFIDENCE",
                defaults.auto_approve_min_confidence,
            ),
            face_match_min_similarity: env_f64(
                "FACE_MATCH_MIN_SIMILARITY",
                defaults.face_match_min_similarity,
            ),
            similarity_drift_band: defaults.similarity_drift_band,
            require_user_confirmation: env_bool(
                "REQUIRE_USER_CONFIRMATION",
                defaults.require_user_confirmation,
            ),
            retry_cooldown: Duration::from_secs(env_u64(
                "KYC_RETRY_COOLDOWN_SECONDS",
                defaults.retry_cooldown.as_secs(),
            )),
        }
    }
}

/// Per-call analyzer deadlines and the submission-level deadline
#[derive(Debug, Clone)]
pub struct AnalyzerDeadlines {
    pub ocr: Duration,
    pub face: Duration,
    pub quality: Duration,
    pub submission: Duration,
}

impl Default for AnalyzerDeadlines {
    fn default() -> Self {
        Self {
            ocr: Duration::from_secs(15),
            face: Duration::from_secs(10),
            quality: Duration::from_secs(5),
            submission: Duration::from_secs(60),
        }
    }
}

impl AnalyzerDeadlines {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ocr: Duration::from_millis(env_u64(
                "OCR_TIMEOUT_MS",
                defaults.ocr.as_millis() as u64,
            )),
            face: Duration::from_millis(env_u64(
                "FACE_TIMEOUT_MS",
                defaults.face.as_millis() as u64,
            )),
            quality: Duration::from_millis(env_u64(
                "QUALITY_TIMEOUT_MS",
                defaults.quality.as_millis() as u64,
            )),
            submission: Duration::from_millis(env_u64(
                "SUBMISSION_TIMEOUT_MS",
                defaults.submission.as_millis() as u64,
            )),
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone)]
pub struct KycConfig {
    pub policy: KycPolicy,
    pub deadlines: AnalyzerDeadlines,
    /// Remote face-detection service; empty/unset disables the remote
    /// backend and keeps detection local
    pub remote_face_api_url: Option<String>,
    /// Base URL of the object-storage HTTP endpoint
    pub storage_base_url: String,
    /// Secret used for signing private-bucket URLs
    pub storage_signing_secret: String,
    /// TTL applied to signed URLs
    pub signed_url_ttl: Duration,
    /// Interval between decision-sweeper passes
    pub sweep_interval: Duration,
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            policy: KycPolicy::default(),
            deadlines: AnalyzerDeadlines::default(),
            remote_face_api_url: None,
            storage_base_url: "http://127.0.0.1:9000".to_string(),
            storage_signing_secret: "dev-secret".to_string(),
            signed_url_ttl: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl KycConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let remote_face_api_url = std::env::var("REMOTE_FACE_API_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Self {
            policy: KycPolicy::from_env(),
            deadlines: AnalyzerDeadlines::from_env(),
            remote_face_api_url,
            storage_base_url: std::env::var("KYC_STORAGE_BASE_URL")
                .unwrap_or(defaults.storage_base_url),
            storage_signing_secret: std::env::var("KYC_STORAGE_SIGNING_SECRET")
                .unwrap_or(defaults.storage_signing_secret),
            signed_url_ttl: Duration::from_secs(env_u64(
                "KYC_SIGNED_URL_TTL_SECONDS",
                defaults.signed_url_ttl.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_u64(
                "KYC_SWEEP_INTERVAL_SECONDS",
                defaults.sweep_interval.as_secs(),
            )),
        }
    }
}
