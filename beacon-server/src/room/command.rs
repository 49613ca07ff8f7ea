use crate::engine::{EngineError, MediaEndpoint, MediaPipeline};
use crate::room::RoomState;
use crate::room::error::RoomError;
use beacon_core::{IceCandidate, ParticipantId, ResourceKind, SinkId, StreamId};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Commands entering the room loop from sessions (and tests).
///
/// Every operation replies with a uniform `Result`; asynchronous outcomes
/// (answers, cascades) are reported through events and alerts.
pub enum RoomCommand {
    EnsurePipeline {
        reply: oneshot::Sender<Result<PipelineStatus, RoomError>>,
    },
    ReleasePipeline {
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Join {
        id: ParticipantId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        id: ParticipantId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Socket closed; dispose without a reply.
    Disconnect {
        id: ParticipantId,
    },
    Publish {
        participant: ParticipantId,
        stream: StreamId,
        sdp_offer: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Unpublish {
        participant: ParticipantId,
        stream: StreamId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Subscribe {
        participant: ParticipantId,
        stream: StreamId,
        sink: SinkId,
        sdp_offer: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Unsubscribe {
        participant: ParticipantId,
        sink: SinkId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Candidate {
        participant: ParticipantId,
        resource: String,
        kind: ResourceKind,
        candidate: IceCandidate,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

/// Pipeline state as seen by a freshly connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Ready,
    Creating,
    Failed,
}

/// Point-in-time view of the room, for operators and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomSnapshot {
    pub state: RoomState,
    pub has_pipeline: bool,
    pub participants: usize,
    pub streams: usize,
    pub sinks: usize,
}

/// The resource a deferred engine completion belongs to, pinned to the
/// negotiation epoch it was issued under. A resource recreated under the
/// same id gets a fresh epoch, so completions from its previous life no
/// longer match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationTarget {
    Stream(StreamId, u64),
    Sink(SinkId, u64),
}

/// Completions of spawned engine calls, re-entering the room loop.
/// Each handler re-validates liveness (presence and epoch) before
/// committing further effects.
pub enum EngineEvent {
    PipelineReady(Result<Arc<dyn MediaPipeline>, EngineError>),
    EndpointReady(NegotiationTarget, Result<Arc<dyn MediaEndpoint>, EngineError>),
    OfferAnswered(NegotiationTarget, Result<String, EngineError>),
    /// Source-to-sink connect finished; the answer rides along so it is
    /// only stored once the sink actually reaches Ready.
    SinkConnected(SinkId, u64, Result<String, EngineError>),
    GatherDone(NegotiationTarget, Result<(), EngineError>),
    LocalCandidate(NegotiationTarget, IceCandidate),
    CandidateRejected(NegotiationTarget, EngineError),
}
