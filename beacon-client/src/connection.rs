use crate::error::ClientError;
use beacon_core::{Action, Alert, Guarded, State};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionState {
    Ready,
    Opening,
    Open,
    Closing,
}

impl State for ConnectionState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            ConnectionState::Ready => &[ConnectionState::Opening],
            // A failed dial falls back to Ready for another attempt.
            ConnectionState::Opening => &[ConnectionState::Open, ConnectionState::Ready],
            ConnectionState::Open => &[ConnectionState::Closing],
            ConnectionState::Closing => &[ConnectionState::Ready],
        }
    }
}

/// Clonable outbound half of a signaling connection. Streams hold one to
/// forward their locally gathered candidates without borrowing the room.
#[derive(Clone)]
pub struct ConnectionSender {
    tx: mpsc::UnboundedSender<Action>,
}

impl ConnectionSender {
    pub fn send(&self, action: Action) -> Result<(), ClientError> {
        self.tx.send(action).map_err(|_| ClientError::ConnectionClosed)
    }
}

/// The persistent signaling socket: actions out, alerts in.
///
/// While open, a writer task serializes queued actions and a reader task
/// parses incoming frames, dropping unparseable ones with a warning. Both
/// stop when the socket goes away or `close` drops their channels. The
/// connection can be opened again after a close.
pub struct Connection {
    fsm: Guarded<ConnectionState>,
    sender: Option<ConnectionSender>,
    incoming: Option<mpsc::UnboundedReceiver<Alert>>,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            fsm: Guarded::new(ConnectionState::Ready),
            sender: None,
            incoming: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.fsm.get()
    }

    pub async fn open(&mut self, url: &str) -> Result<(), ClientError> {
        self.fsm.set(ConnectionState::Opening)?;
        let socket = match connect_async(url).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                let _ = self.fsm.set(ConnectionState::Ready);
                return Err(e.into());
            }
        };
        debug!(url, "signaling connection established");
        let (mut write, mut read) = socket.split();

        let (action_tx, mut action_rx) = mpsc::unbounded_channel::<Action>();
        tokio::spawn(async move {
            while let Some(action) = action_rx.recv().await {
                let Ok(json) = serde_json::to_string(&action) else {
                    continue;
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let (alert_tx, incoming) = mpsc::unbounded_channel::<Alert>();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<Alert>(&text) {
                        Ok(alert) => {
                            if alert_tx.send(alert).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("unparseable alert dropped: {e}"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        self.sender = Some(ConnectionSender { tx: action_tx });
        self.incoming = Some(incoming);
        self.fsm.set(ConnectionState::Open)?;
        Ok(())
    }

    /// Dropping the channels ends both socket tasks; the writer sends the
    /// close frame on its way out.
    pub fn close(&mut self) -> Result<(), ClientError> {
        self.fsm.set(ConnectionState::Closing)?;
        self.sender = None;
        self.incoming = None;
        self.fsm.set(ConnectionState::Ready)?;
        Ok(())
    }

    pub fn sender(&self) -> Result<ConnectionSender, ClientError> {
        match &self.sender {
            Some(sender) if self.fsm.get() == ConnectionState::Open => Ok(sender.clone()),
            _ => Err(ClientError::NotOpen),
        }
    }

    pub fn send(&self, action: Action) -> Result<(), ClientError> {
        self.sender()?.send(action)
    }

    /// Next alert from the server; `None` once the socket is gone or the
    /// connection is not open.
    pub async fn recv(&mut self) -> Option<Alert> {
        match &mut self.incoming {
            Some(incoming) => incoming.recv().await,
            None => None,
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}
