use beacon_core::{Event, ParticipantId, SinkId, StreamId};

/// Typed re-emissions of the server's alerts, published on the room
/// mirror's dispatcher after the local maps have been updated.
#[derive(Debug, Clone)]
pub enum ClientRoomEvent {
    Joined {
        id: ParticipantId,
    },
    Left,
    ParticipantsJoined {
        items: Vec<ParticipantId>,
    },
    ParticipantsLeft {
        items: Vec<ParticipantId>,
    },
    StreamsCreated {
        items: Vec<StreamId>,
    },
    StreamsUpdated {
        items: Vec<StreamId>,
    },
    StreamsDestroyed {
        items: Vec<StreamId>,
    },
    Published {
        id: StreamId,
    },
    Unpublished {
        id: StreamId,
    },
    Subscribed {
        stream_id: StreamId,
        id: SinkId,
    },
    Unsubscribed {
        stream_id: StreamId,
        id: SinkId,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientRoomEventKind {
    Joined,
    Left,
    ParticipantsJoined,
    ParticipantsLeft,
    StreamsCreated,
    StreamsUpdated,
    StreamsDestroyed,
    Published,
    Unpublished,
    Subscribed,
    Unsubscribed,
    Error,
}

impl Event for ClientRoomEvent {
    type Kind = ClientRoomEventKind;

    fn kind(&self) -> ClientRoomEventKind {
        match self {
            ClientRoomEvent::Joined { .. } => ClientRoomEventKind::Joined,
            ClientRoomEvent::Left => ClientRoomEventKind::Left,
            ClientRoomEvent::ParticipantsJoined { .. } => ClientRoomEventKind::ParticipantsJoined,
            ClientRoomEvent::ParticipantsLeft { .. } => ClientRoomEventKind::ParticipantsLeft,
            ClientRoomEvent::StreamsCreated { .. } => ClientRoomEventKind::StreamsCreated,
            ClientRoomEvent::StreamsUpdated { .. } => ClientRoomEventKind::StreamsUpdated,
            ClientRoomEvent::StreamsDestroyed { .. } => ClientRoomEventKind::StreamsDestroyed,
            ClientRoomEvent::Published { .. } => ClientRoomEventKind::Published,
            ClientRoomEvent::Unpublished { .. } => ClientRoomEventKind::Unpublished,
            ClientRoomEvent::Subscribed { .. } => ClientRoomEventKind::Subscribed,
            ClientRoomEvent::Unsubscribed { .. } => ClientRoomEventKind::Unsubscribed,
            ClientRoomEvent::Error { .. } => ClientRoomEventKind::Error,
        }
    }
}
