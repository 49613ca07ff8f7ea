use beacon_core::IllegalTransition;
use thiserror::Error;

/// Validation failures of the room's public operations.
///
/// Every operation returns one of these through its command reply; engine
/// failures never surface here, they drive the affected resource into a
/// terminal state instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room not ready")]
    RoomNotReady,

    #[error("Participant not found")]
    ParticipantNotFound,

    #[error("Participant with id already exists")]
    ParticipantExists,

    #[error("Stream not found")]
    StreamNotFound,

    #[error("Stream with id already exists")]
    StreamExists,

    #[error("Stream not ready")]
    StreamNotReady,

    #[error("Sink not found")]
    SinkNotFound,

    #[error("Sink with id already exists")]
    SinkExists,

    #[error("Not stream owner")]
    NotStreamOwner,

    #[error("Not sink owner")]
    NotSinkOwner,

    #[error("Invalid resource type")]
    InvalidResourceKind,

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Room is gone")]
    RoomClosed,
}
