use async_trait::async_trait;
use beacon_core::IceCandidate;
use std::sync::Arc;
use thiserror::Error;

mod loopback;

pub use loopback::LoopbackEngine;

/// Failure reported by the external media engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type CandidateCallback = Box<dyn Fn(IceCandidate) + Send + Sync>;

/// The external media-processing engine. The control plane only consumes
/// this surface; it owns none of its semantics.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, EngineError>;
}

/// Engine context that endpoints are created within; shared by the whole
/// room.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    async fn create_endpoint(&self) -> Result<Arc<dyn MediaEndpoint>, EngineError>;

    async fn release(&self);
}

/// One side of a media connection inside the engine.
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Engine-assigned endpoint id.
    fn id(&self) -> &str;

    /// Submits an SDP offer and returns the engine's SDP answer.
    async fn process_offer(&self, sdp_offer: &str) -> Result<String, EngineError>;

    /// Connects this endpoint's media output to `other`'s input.
    async fn connect(&self, other: Arc<dyn MediaEndpoint>) -> Result<(), EngineError>;

    /// Starts asynchronous candidate gathering; locally discovered
    /// candidates arrive through the `on_candidate` callback.
    async fn gather_candidates(&self) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    fn on_candidate(&self, callback: CandidateCallback);

    async fn release(&self);
}
