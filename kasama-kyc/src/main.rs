//! kasama-kyc - KYC Verification Microservice
//!
//! **Module Identity:**
//! - Name: kasama-kyc (KYC Verification)
//! - Port: 5731
//!
//! **[KYC-OV-010]** Responsible for verifying identity documents submitted
//! by individual workers and agencies: image analysis, field extraction,
//! auto-approval policy, human-review fallback, and owner notifications.

use anyhow::Result;
use kasama_kyc::analyzers::OcrEngine;
use kasama_kyc::config::KycConfig;
use kasama_kyc::orchestrator::SubmissionOrchestrator;
use kasama_kyc::prewarm::FaceModelHandle;
use kasama_kyc::storage::HttpObjectStorage;
use kasama_kyc::AppState;
use kasama_common::events::EventBus;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting kasama-kyc (KYC Verification) microservice");
    info!("Port: 5731");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let root_folder =
        kasama_common::config::resolve_root_folder(None, "KASAMA_ROOT_FOLDER", Some("root_folder"))
            .map_err(|e| anyhow::anyhow!("Failed to resolve root folder: {}", e))?;

    // Step 2: Create root folder directory if missing
    let initializer = kasama_common::config::RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = kasama_kyc::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Service configuration from environment
    let config = KycConfig::from_env();
    info!(
        auto_approve_enabled = config.policy.auto_approve_enabled,
        auto_approve_min_confidence = config.policy.auto_approve_min_confidence,
        face_match_min_similarity = config.policy.face_match_min_similarity,
        "Policy loaded"
    );

    // Event bus for SSE broadcasting
    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    // Pre-warm the face backend off the request path **[KYC-PW-010]**
    let face_model = FaceModelHandle::spawn(&config);

    // OCR availability is probed once at startup
    let ocr_engine = Arc::new(OcrEngine::discover());
    if !ocr_engine.is_available() {
        info!("tesseract not found; documents will be verified without OCR");
    }

    let storage = Arc::new(HttpObjectStorage::new(
        config.storage_base_url.clone(),
        config.storage_signing_secret.clone(),
    )?);

    let orchestrator = Arc::new(SubmissionOrchestrator::new(
        db_pool.clone(),
        storage,
        face_model.clone(),
        ocr_engine,
        event_bus.clone(),
        config.clone(),
    ));

    // Background decision sweeper for stranded submissions **[KYC-SW-010]**
    kasama_kyc::sweeper::spawn_decision_sweeper(
        db_pool.clone(),
        Arc::clone(&orchestrator),
        config.sweep_interval,
    );

    // Create application state and router
    let state = AppState::new(db_pool, event_bus, orchestrator, face_model, config);
    let app = kasama_kyc::build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind("127.0.0.1:5731").await?;
    info!("Listening on http://127.0.0.1:5731");
    info!("Health check: http://127.0.0.1:5731/health");

    axum::serve(listener, app).await?;

    Ok(())
}
