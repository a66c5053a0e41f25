//! Face-model pre-warm coordinator
//!
//! **[KYC-PW-010]** The face backend is loaded once per process on a
//! background task, off the request path. Readiness is published through a
//! watch channel: a request that lands before the model is ready awaits the
//! channel instead of re-loading. The loader task holds no resources that
//! would prevent process shutdown.

use crate::analyzers::{FaceEngine, HeuristicFaceBackend, RemoteFaceBackend};
use crate::config::KycConfig;
use std::sync::Arc;
use tokio::sync::watch;

/// Handle to the lazily-initialized face engine
#[derive(Clone)]
pub struct FaceModelHandle {
    rx: watch::Receiver<Option<Arc<FaceEngine>>>,
}

impl FaceModelHandle {
    /// Spawn the background loader and return a handle immediately
    ///
    /// The service starts serving before the load finishes; the first KYC
    /// request blocks on [`FaceModelHandle::engine`] until readiness.
    pub fn spawn(config: &KycConfig) -> Self {
        let (tx, rx) = watch::channel(None);
        let remote_url = config.remote_face_api_url.clone();
        let face_deadline = config.deadlines.face;

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            tracing::info!("Pre-warming face backend");

            let engine = build_engine(remote_url, face_deadline).await;

            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Face backend ready"
            );
            // Receivers may all be gone during shutdown; nothing to do then
            let _ = tx.send(Some(Arc::new(engine)));
        });

        Self { rx }
    }

    /// Handle that is ready immediately (tests, embedded use)
    pub fn ready_now(engine: Arc<FaceEngine>) -> Self {
        // The receiver keeps serving the initial value after the sender
        // drops
        let (_tx, rx) = watch::channel(Some(engine));
        Self { rx }
    }

    /// Whether the model has finished loading
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The engine, awaiting readiness if the loader has not finished
    pub async fn engine(&self) -> Option<Arc<FaceEngine>> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(engine) = rx.borrow().clone() {
                return Some(engine);
            }
            // Loader task died without publishing (channel closed)
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

async fn build_engine(
    remote_url: Option<String>,
    face_deadline: std::time::Duration,
) -> FaceEngine {
    let remote = remote_url.and_then(|url| {
        match RemoteFaceBackend::new(url.clone(), face_deadline) {
            Ok(backend) => {
                tracing::info!(url = %url, "Remote face service configured");
                Some(Arc::new(backend) as Arc<dyn crate::analyzers::FaceBackend>)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Remote face client construction failed; local only");
                None
            }
        }
    });

    #[cfg(feature = "onnx")]
    {
        if let Ok(model_path) = std::env::var("KYC_FACE_MODEL_PATH") {
            match crate::analyzers::face::onnx::OnnxFaceBackend::load(std::path::Path::new(
                &model_path,
            )) {
                Ok(backend) => {
                    tracing::info!(model = %model_path, "ONNX face backend loaded");
                    return FaceEngine::new(Arc::new(backend), remote);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ONNX model load failed; falling back to heuristic backend");
                }
            }
        }
    }

    FaceEngine::new(Arc::new(HeuristicFaceBackend::new()), remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawned_handle_becomes_ready() {
        let config = KycConfig::default();
        let handle = FaceModelHandle::spawn(&config);

        // First request path: await readiness
        let engine = handle.engine().await;
        assert!(engine.is_some());
        assert!(handle.is_ready());
    }

    #[tokio::test]
    async fn test_ready_now_is_immediately_ready() {
        let engine = Arc::new(FaceEngine::new(Arc::new(HeuristicFaceBackend::new()), None));
        let handle = FaceModelHandle::ready_now(engine);
        assert!(handle.is_ready());
        assert!(handle.engine().await.is_some());
    }

    #[tokio::test]
    async fn test_clone_shares_readiness() {
        let config = KycConfig::default();
        let handle = FaceModelHandle::spawn(&config);
        let clone = handle.clone();
        assert!(clone.engine().await.is_some());
    }
}
