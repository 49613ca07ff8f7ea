pub mod connection;
pub mod error;
pub mod events;
pub mod local_stream;
pub mod peer;
pub mod remote_stream;
pub mod room;

pub use connection::{Connection, ConnectionSender, ConnectionState};
pub use error::ClientError;
pub use events::{ClientRoomEvent, ClientRoomEventKind};
pub use local_stream::{LocalStream, LocalStreamState};
pub use peer::{
    LocalCandidateCallback, LoopbackPeerFactory, MediaCapture, MediaPeer, PeerFactory,
};
pub use remote_stream::{RemoteStream, RemoteStreamState};
pub use room::{Room, RoomMirrorState};
