mod command;
mod error;
mod events;
mod handle;
mod participant;
mod room;
mod sink;
mod stream;

pub use command::{EngineEvent, NegotiationTarget, PipelineStatus, RoomCommand, RoomSnapshot};
pub use error::RoomError;
pub use events::{ParticipantEvent, ParticipantEventKind, RoomEvent, RoomEventKind};
pub use handle::RoomHandle;
pub use participant::{Participant, ParticipantState};
pub use room::{Room, RoomState};
pub use sink::{Sink, SinkState};
pub use stream::{Stream, StreamState};
