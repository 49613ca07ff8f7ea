use async_trait::async_trait;
use beacon_core::IceCandidate;
use beacon_server::engine::{
    CandidateCallback, EngineError, MediaEndpoint, MediaEngine, MediaPipeline,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Per-stage fault switches, flipped by tests mid-run.
#[derive(Default)]
pub struct Faults {
    pub fail_pipeline: AtomicBool,
    pub fail_endpoint: AtomicBool,
    pub fail_offer: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_gather: AtomicBool,
    pub fail_candidate: AtomicBool,
}

/// Scripted engine: records every call, optionally fails a stage, and can
/// park endpoint creation on a gate so tests can race disposals against
/// in-flight negotiation.
pub struct MockEngine {
    pub faults: Arc<Faults>,
    pub state: Arc<MockState>,
}

pub struct MockState {
    hold_endpoints: AtomicBool,
    endpoint_gate: Semaphore,
    next_id: AtomicU64,
    pub endpoints: Mutex<Vec<Arc<MockEndpoint>>>,
    pub released_endpoints: AtomicUsize,
    pub released_pipelines: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            faults: Arc::new(Faults::default()),
            state: Arc::new(MockState {
                hold_endpoints: AtomicBool::new(false),
                endpoint_gate: Semaphore::new(0),
                next_id: AtomicU64::new(0),
                endpoints: Mutex::new(Vec::new()),
                released_endpoints: AtomicUsize::new(0),
                released_pipelines: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes every subsequent `create_endpoint` wait for a matching
    /// [`MockEngine::release_one_endpoint`].
    pub fn hold_endpoints(&self) {
        self.state.hold_endpoints.store(true, Ordering::SeqCst);
    }

    pub fn release_one_endpoint(&self) {
        self.state.endpoint_gate.add_permits(1);
    }

    pub fn endpoint(&self, index: usize) -> Arc<MockEndpoint> {
        let endpoints = self.state.endpoints.lock().unwrap();
        Arc::clone(&endpoints[index])
    }

    pub fn endpoint_count(&self) -> usize {
        self.state.endpoints.lock().unwrap().len()
    }

    pub fn released_endpoints(&self) -> usize {
        self.state.released_endpoints.load(Ordering::SeqCst)
    }

    pub fn released_pipelines(&self) -> usize {
        self.state.released_pipelines.load(Ordering::SeqCst)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, EngineError> {
        if self.faults.fail_pipeline.load(Ordering::SeqCst) {
            return Err(EngineError::new("pipeline refused"));
        }
        Ok(Arc::new(MockPipeline {
            faults: Arc::clone(&self.faults),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockPipeline {
    faults: Arc<Faults>,
    state: Arc<MockState>,
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    async fn create_endpoint(&self) -> Result<Arc<dyn MediaEndpoint>, EngineError> {
        if self.state.hold_endpoints.load(Ordering::SeqCst) {
            match self.state.endpoint_gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(EngineError::new("gate closed")),
            }
        }
        if self.faults.fail_endpoint.load(Ordering::SeqCst) {
            return Err(EngineError::new("endpoint refused"));
        }
        let n = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let endpoint = Arc::new(MockEndpoint {
            id: format!("mock-{n}"),
            faults: Arc::clone(&self.faults),
            state: Arc::clone(&self.state),
            ops: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
        });
        self.state
            .endpoints
            .lock()
            .unwrap()
            .push(Arc::clone(&endpoint));
        Ok(endpoint)
    }

    async fn release(&self) {
        self.state.released_pipelines.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockEndpoint {
    pub id: String,
    faults: Arc<Faults>,
    state: Arc<MockState>,
    /// Call log in invocation order, e.g. `candidate:c1`, `offer:v=0`.
    pub ops: Mutex<Vec<String>>,
    callback: Mutex<Option<CandidateCallback>>,
}

impl MockEndpoint {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Fires `candidate` through the registered local-candidate callback,
    /// as the engine would while gathering.
    pub fn push_local_candidate(&self, candidate: &str) {
        if let Some(callback) = &*self.callback.lock().unwrap() {
            callback(IceCandidate::new(candidate));
        }
    }
}

#[async_trait]
impl MediaEndpoint for MockEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn process_offer(&self, sdp_offer: &str) -> Result<String, EngineError> {
        if self.faults.fail_offer.load(Ordering::SeqCst) {
            return Err(EngineError::new("offer refused"));
        }
        self.ops.lock().unwrap().push(format!("offer:{sdp_offer}"));
        Ok(format!("answer to: {sdp_offer}"))
    }

    async fn connect(&self, other: Arc<dyn MediaEndpoint>) -> Result<(), EngineError> {
        if self.faults.fail_connect.load(Ordering::SeqCst) {
            return Err(EngineError::new("connect refused"));
        }
        self.ops
            .lock()
            .unwrap()
            .push(format!("connect:{}", other.id()));
        Ok(())
    }

    async fn gather_candidates(&self) -> Result<(), EngineError> {
        if self.faults.fail_gather.load(Ordering::SeqCst) {
            return Err(EngineError::new("gather refused"));
        }
        self.ops.lock().unwrap().push("gather".to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if self.faults.fail_candidate.load(Ordering::SeqCst) {
            return Err(EngineError::new("candidate refused"));
        }
        self.ops
            .lock()
            .unwrap()
            .push(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    fn on_candidate(&self, callback: CandidateCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    async fn release(&self) {
        self.ops.lock().unwrap().push("release".to_string());
        self.state.released_endpoints.fetch_add(1, Ordering::SeqCst);
    }
}
