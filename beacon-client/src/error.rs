use beacon_core::IllegalTransition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    ConnectionClosed,

    /// `send` on a connection that is not in the `Open` state fails right
    /// away instead of queueing.
    #[error("connection is not open")]
    NotOpen,

    /// The server answered with something the protocol does not allow at
    /// this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server rejected the request with an error alert.
    #[error("server error: {0}")]
    Server(String),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("media peer error: {0}")]
    Peer(String),
}
