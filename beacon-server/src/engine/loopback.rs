use crate::engine::{CandidateCallback, EngineError, MediaEndpoint, MediaEngine, MediaPipeline};
use async_trait::async_trait;
use beacon_core::IceCandidate;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// In-process stand-in engine: echo answers, no media.
///
/// Backs the server binary until a real engine binding is configured.
pub struct LoopbackEngine {
    next_id: AtomicU64,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
        }
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(pipeline = id, "loopback pipeline created");
        Ok(Arc::new(LoopbackPipeline {
            id,
            next_endpoint: AtomicU64::new(0),
        }))
    }
}

struct LoopbackPipeline {
    id: u64,
    next_endpoint: AtomicU64,
}

#[async_trait]
impl MediaPipeline for LoopbackPipeline {
    async fn create_endpoint(&self) -> Result<Arc<dyn MediaEndpoint>, EngineError> {
        let n = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(LoopbackEndpoint {
            id: format!("loopback-{}-{}", self.id, n),
            callback: Mutex::new(None),
        }))
    }

    async fn release(&self) {
        debug!(pipeline = self.id, "loopback pipeline released");
    }
}

struct LoopbackEndpoint {
    id: String,
    callback: Mutex<Option<CandidateCallback>>,
}

#[async_trait]
impl MediaEndpoint for LoopbackEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn process_offer(&self, sdp_offer: &str) -> Result<String, EngineError> {
        Ok(format!("v=0\r\n; loopback answer to: {sdp_offer}"))
    }

    async fn connect(&self, other: Arc<dyn MediaEndpoint>) -> Result<(), EngineError> {
        debug!(from = self.id, to = other.id(), "loopback connect");
        Ok(())
    }

    async fn gather_candidates(&self) -> Result<(), EngineError> {
        if let Some(callback) = &*self.callback.lock().await {
            callback(IceCandidate::new(format!("candidate:loopback {}", self.id)));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), EngineError> {
        Ok(())
    }

    fn on_candidate(&self, callback: CandidateCallback) {
        if let Ok(mut slot) = self.callback.try_lock() {
            *slot = Some(callback);
        }
    }

    async fn release(&self) {
        debug!(endpoint = self.id, "loopback endpoint released");
    }
}
