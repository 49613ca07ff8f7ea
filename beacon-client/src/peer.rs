use crate::error::ClientError;
use async_trait::async_trait;
use beacon_core::IceCandidate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub type LocalCandidateCallback = Box<dyn Fn(IceCandidate) + Send + Sync>;

/// Local capture media backing a publication; acquired before the first
/// publish and held across republish cycles.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn start(&self) -> Result<(), ClientError>;

    async fn stop(&self);
}

/// Client-side media session backing one stream or sink.
///
/// The signaling mirror only negotiates through this surface; a browser
/// binding, a native WebRTC stack or a test double all fit behind it.
#[async_trait]
pub trait MediaPeer: Send + Sync {
    async fn create_offer(&self) -> Result<String, ClientError>;

    async fn apply_answer(&self, sdp_answer: &str) -> Result<(), ClientError>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ClientError>;

    /// Registers the callback invoked for each locally gathered candidate.
    fn on_local_candidate(&self, callback: LocalCandidateCallback);

    async fn close(&self);
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create_capture(&self) -> Result<Arc<dyn MediaCapture>, ClientError>;

    /// Send-only peer for a publication.
    async fn create_send_peer(&self) -> Result<Arc<dyn MediaPeer>, ClientError>;

    /// Receive-only peer for a subscription.
    async fn create_recv_peer(&self) -> Result<Arc<dyn MediaPeer>, ClientError>;
}

/// Stand-in media without real devices: fixed-form offers, one synthetic
/// local candidate per negotiation. Mirrors the server's loopback engine
/// for demos and end-to-end tests.
pub struct LoopbackPeerFactory {
    next_id: AtomicU64,
}

impl LoopbackPeerFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
        }
    }

    fn peer(&self, direction: &str) -> Arc<dyn MediaPeer> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(LoopbackPeer {
            id: format!("{direction}-peer-{n}"),
            callback: Mutex::new(None),
        })
    }
}

impl Default for LoopbackPeerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerFactory for LoopbackPeerFactory {
    async fn create_capture(&self) -> Result<Arc<dyn MediaCapture>, ClientError> {
        Ok(Arc::new(LoopbackCapture))
    }

    async fn create_send_peer(&self) -> Result<Arc<dyn MediaPeer>, ClientError> {
        Ok(self.peer("send"))
    }

    async fn create_recv_peer(&self) -> Result<Arc<dyn MediaPeer>, ClientError> {
        Ok(self.peer("recv"))
    }
}

struct LoopbackCapture;

#[async_trait]
impl MediaCapture for LoopbackCapture {
    async fn start(&self) -> Result<(), ClientError> {
        debug!("loopback capture started");
        Ok(())
    }

    async fn stop(&self) {
        debug!("loopback capture stopped");
    }
}

struct LoopbackPeer {
    id: String,
    callback: Mutex<Option<LocalCandidateCallback>>,
}

#[async_trait]
impl MediaPeer for LoopbackPeer {
    async fn create_offer(&self) -> Result<String, ClientError> {
        Ok(format!("v=0\r\n; loopback offer from: {}", self.id))
    }

    /// Gathering starts once the negotiation settles, so the candidate
    /// never races the request that creates its resource.
    async fn apply_answer(&self, sdp_answer: &str) -> Result<(), ClientError> {
        debug!(peer = self.id, answer = sdp_answer, "answer applied");
        if let Ok(slot) = self.callback.lock() {
            if let Some(callback) = &*slot {
                callback(IceCandidate::new(format!("candidate:loopback {}", self.id)));
            }
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ClientError> {
        debug!(peer = self.id, candidate = candidate.candidate, "remote candidate added");
        Ok(())
    }

    fn on_local_candidate(&self, callback: LocalCandidateCallback) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(callback);
        }
    }

    async fn close(&self) {
        debug!(peer = self.id, "peer closed");
    }
}
