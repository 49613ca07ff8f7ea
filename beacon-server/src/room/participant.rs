use crate::room::events::ParticipantEvent;
use beacon_core::{Dispatcher, Guarded, ParticipantId, SinkId, State, StreamId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParticipantState {
    Ready,
    Disposed,
}

impl State for ParticipantState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            ParticipantState::Ready => &[ParticipantState::Disposed],
            ParticipantState::Disposed => &[],
        }
    }
}

/// A joined session and the resources it owns. Streams and sinks are
/// referenced by id only; the room's flat maps hold the entities.
pub struct Participant {
    pub id: ParticipantId,
    fsm: Guarded<ParticipantState>,
    /// Ids of this participant's publications.
    pub streams: HashSet<StreamId>,
    /// At most one sink per source stream.
    pub sinks_by_stream: HashMap<StreamId, SinkId>,
    pub dispatcher: Dispatcher<ParticipantEvent>,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            fsm: Guarded::new(ParticipantState::Ready),
            streams: HashSet::new(),
            sinks_by_stream: HashMap::new(),
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn state(&self) -> ParticipantState {
        self.fsm.get()
    }

    pub fn mark_disposed(&mut self) {
        if let Err(e) = self.fsm.set(ParticipantState::Disposed) {
            tracing::debug!(participant = %self.id, error = %e, "dispose transition skipped");
        }
    }
}
