use beacon_core::{Event, IceCandidate, ParticipantId, ResourceKind, SinkId, StreamId};

/// Room-scoped events; the signaling layer turns most of these into
/// broadcasts that exclude the originating participant's own session.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Ready,
    Released,
    ParticipantCreated {
        id: ParticipantId,
    },
    ParticipantDisposed {
        id: ParticipantId,
    },
    StreamCreated {
        participant_id: ParticipantId,
        id: StreamId,
    },
    StreamDisposed {
        participant_id: ParticipantId,
        id: StreamId,
    },
    SinkCreated {
        participant_id: ParticipantId,
        stream_id: StreamId,
        id: SinkId,
    },
    SinkDisposed {
        participant_id: ParticipantId,
        stream_id: StreamId,
        id: SinkId,
    },
    Error {
        participant_id: Option<ParticipantId>,
        kind: ResourceKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomEventKind {
    Ready,
    Released,
    ParticipantCreated,
    ParticipantDisposed,
    StreamCreated,
    StreamDisposed,
    SinkCreated,
    SinkDisposed,
    Error,
}

impl Event for RoomEvent {
    type Kind = RoomEventKind;

    fn kind(&self) -> RoomEventKind {
        match self {
            RoomEvent::Ready => RoomEventKind::Ready,
            RoomEvent::Released => RoomEventKind::Released,
            RoomEvent::ParticipantCreated { .. } => RoomEventKind::ParticipantCreated,
            RoomEvent::ParticipantDisposed { .. } => RoomEventKind::ParticipantDisposed,
            RoomEvent::StreamCreated { .. } => RoomEventKind::StreamCreated,
            RoomEvent::StreamDisposed { .. } => RoomEventKind::StreamDisposed,
            RoomEvent::SinkCreated { .. } => RoomEventKind::SinkCreated,
            RoomEvent::SinkDisposed { .. } => RoomEventKind::SinkDisposed,
            RoomEvent::Error { .. } => RoomEventKind::Error,
        }
    }
}

/// Events scoped to one participant's session; the join wiring maps these
/// onto the alerts sent to that session only.
#[derive(Debug, Clone)]
pub enum ParticipantEvent {
    Created,
    Disposed,
    StreamCreated {
        id: StreamId,
        sdp_answer: String,
    },
    StreamDisposed {
        id: StreamId,
    },
    SinkCreated {
        stream_id: StreamId,
        id: SinkId,
        sdp_answer: String,
    },
    SinkDisposed {
        stream_id: StreamId,
        id: SinkId,
    },
    IceCandidate {
        kind: ResourceKind,
        id: String,
        stream_id: Option<StreamId>,
        candidate: IceCandidate,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantEventKind {
    Created,
    Disposed,
    StreamCreated,
    StreamDisposed,
    SinkCreated,
    SinkDisposed,
    IceCandidate,
    Error,
}

impl Event for ParticipantEvent {
    type Kind = ParticipantEventKind;

    fn kind(&self) -> ParticipantEventKind {
        match self {
            ParticipantEvent::Created => ParticipantEventKind::Created,
            ParticipantEvent::Disposed => ParticipantEventKind::Disposed,
            ParticipantEvent::StreamCreated { .. } => ParticipantEventKind::StreamCreated,
            ParticipantEvent::StreamDisposed { .. } => ParticipantEventKind::StreamDisposed,
            ParticipantEvent::SinkCreated { .. } => ParticipantEventKind::SinkCreated,
            ParticipantEvent::SinkDisposed { .. } => ParticipantEventKind::SinkDisposed,
            ParticipantEvent::IceCandidate { .. } => ParticipantEventKind::IceCandidate,
            ParticipantEvent::Error { .. } => ParticipantEventKind::Error,
        }
    }
}
