use crate::engine::MediaEndpoint;
use beacon_core::{Guarded, IceCandidate, ParticipantId, State, StreamId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamState {
    New,
    Creating,
    Ready,
    EndpointFailed,
    OfferFailed,
    GatherFailed,
    Disposed,
}

impl State for StreamState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            // No New -> Disposed edge: a stream that never started
            // negotiating keeps its state when disposed (see DESIGN.md).
            StreamState::New => &[StreamState::Creating],
            StreamState::Creating => &[
                StreamState::Ready,
                StreamState::EndpointFailed,
                StreamState::OfferFailed,
                StreamState::Disposed,
            ],
            StreamState::Ready => &[StreamState::GatherFailed, StreamState::Disposed],
            StreamState::EndpointFailed | StreamState::OfferFailed | StreamState::GatherFailed => {
                &[StreamState::Disposed]
            }
            StreamState::Disposed => &[],
        }
    }
}

/// A participant's publication: one engine endpoint under negotiation or
/// serving media.
pub struct Stream {
    pub id: StreamId,
    pub owner: ParticipantId,
    /// Negotiation generation. Engine completions carry the epoch they
    /// were issued under; a republished id gets a fresh one, so stale
    /// completions from the previous life are discarded.
    pub epoch: u64,
    fsm: Guarded<StreamState>,
    pub endpoint: Option<Arc<dyn MediaEndpoint>>,
    /// Candidates received before the endpoint exists; drained exactly once
    /// when it does.
    pub candidate_queue: Vec<IceCandidate>,
    /// Set iff the stream is Ready.
    pub sdp_answer: Option<String>,
    /// The client's offer, held until the endpoint is available.
    pub pending_offer: Option<String>,
}

impl Stream {
    pub fn new(id: StreamId, owner: ParticipantId, epoch: u64) -> Self {
        Self {
            id,
            owner,
            epoch,
            fsm: Guarded::new(StreamState::New),
            endpoint: None,
            candidate_queue: Vec::new(),
            sdp_answer: None,
            pending_offer: None,
        }
    }

    pub fn state(&self) -> StreamState {
        self.fsm.get()
    }

    pub fn transition(&mut self, target: StreamState) -> Result<(), beacon_core::IllegalTransition> {
        self.fsm.set(target)
    }

    pub fn mark_disposed(&mut self) {
        if self.fsm.get() == StreamState::New {
            return;
        }
        if let Err(e) = self.fsm.set(StreamState::Disposed) {
            tracing::debug!(stream = %self.id, error = %e, "dispose transition skipped");
        }
    }
}
