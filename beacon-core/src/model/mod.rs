mod id;
mod message;
mod resource;

pub use id::{ParticipantId, SinkId, StreamId};
pub use message::{Action, Alert};
pub use resource::{IceCandidate, ResourceKind, ResourceRef};
