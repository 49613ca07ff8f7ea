pub mod dispatcher;
pub mod fsm;
pub mod model;

pub use dispatcher::{Dispatcher, Event};
pub use fsm::{Guarded, IllegalTransition, State};
pub use model::{
    Action, Alert, IceCandidate, ParticipantId, ResourceKind, ResourceRef, SinkId, StreamId,
};
