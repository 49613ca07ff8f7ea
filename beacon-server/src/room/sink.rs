use crate::engine::MediaEndpoint;
use beacon_core::{Guarded, IceCandidate, ParticipantId, SinkId, State, StreamId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkState {
    New,
    Creating,
    Ready,
    EndpointFailed,
    OfferFailed,
    ConnectFailed,
    GatherFailed,
    StreamNotFound,
    Disposed,
}

impl State for SinkState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            // No New -> Disposed edge, same rule as Stream.
            SinkState::New => &[SinkState::Creating],
            SinkState::Creating => &[
                SinkState::Ready,
                SinkState::EndpointFailed,
                SinkState::OfferFailed,
                SinkState::ConnectFailed,
                SinkState::StreamNotFound,
                SinkState::Disposed,
            ],
            SinkState::Ready => &[SinkState::GatherFailed, SinkState::Disposed],
            SinkState::EndpointFailed
            | SinkState::OfferFailed
            | SinkState::ConnectFailed
            | SinkState::GatherFailed
            | SinkState::StreamNotFound => &[SinkState::Disposed],
            SinkState::Disposed => &[],
        }
    }
}

/// A participant's subscription to another stream's media. Must not
/// outlive its source stream.
pub struct Sink {
    pub id: SinkId,
    pub owner: ParticipantId,
    /// Source stream, referenced by id only.
    pub stream: StreamId,
    /// Negotiation generation, same discipline as `Stream::epoch`.
    pub epoch: u64,
    fsm: Guarded<SinkState>,
    pub endpoint: Option<Arc<dyn MediaEndpoint>>,
    pub candidate_queue: Vec<IceCandidate>,
    /// Set iff the sink is Ready.
    pub sdp_answer: Option<String>,
    pub pending_offer: Option<String>,
}

impl Sink {
    pub fn new(id: SinkId, owner: ParticipantId, stream: StreamId, epoch: u64) -> Self {
        Self {
            id,
            owner,
            stream,
            epoch,
            fsm: Guarded::new(SinkState::New),
            endpoint: None,
            candidate_queue: Vec::new(),
            sdp_answer: None,
            pending_offer: None,
        }
    }

    pub fn state(&self) -> SinkState {
        self.fsm.get()
    }

    pub fn transition(&mut self, target: SinkState) -> Result<(), beacon_core::IllegalTransition> {
        self.fsm.set(target)
    }

    pub fn mark_disposed(&mut self) {
        if self.fsm.get() == SinkState::New {
            return;
        }
        if let Err(e) = self.fsm.set(SinkState::Disposed) {
            tracing::debug!(sink = %self.id, error = %e, "dispose transition skipped");
        }
    }
}
