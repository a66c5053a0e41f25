//! kasama-kyc library interface
//!
//! Exposes the KYC verification pipeline for the service binary, the
//! kyc-ops tooling, and integration tests.

pub mod analyzers;
pub mod api;
pub mod config;
pub mod db;
pub mod decision;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod orchestrator;
pub mod prewarm;
pub mod storage;
pub mod sweeper;
pub mod types;
pub mod verifier;

pub use crate::error::{ApiError, ApiResult};

use crate::config::KycConfig;
use crate::orchestrator::SubmissionOrchestrator;
use crate::prewarm::FaceModelHandle;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use kasama_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool **[KYC-DB-010]**
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Submission orchestrator **[KYC-OR-010]**
    pub orchestrator: Arc<SubmissionOrchestrator>,
    /// Lazily pre-warmed face backend **[KYC-PW-010]**
    pub face_model: FaceModelHandle,
    /// Service configuration snapshot
    pub config: KycConfig,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        orchestrator: Arc<SubmissionOrchestrator>,
        face_model: FaceModelHandle,
        config: KycConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            face_model,
            config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// **[KYC-API-010]** API endpoint routing
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::submission_routes())
        .merge(api::review_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
