pub mod config;
pub mod engine;
pub mod room;
pub mod signaling;

pub use config::ServerConfig;
pub use engine::{EngineError, LoopbackEngine, MediaEndpoint, MediaEngine, MediaPipeline};
pub use room::{
    PipelineStatus, Room, RoomCommand, RoomError, RoomEvent, RoomEventKind, RoomHandle,
    RoomSnapshot, RoomState,
};
pub use signaling::{AlertSink, SessionRegistry, SignalingService, ws_handler};
