use crate::error::ClientError;
use crate::peer::{MediaCapture, MediaPeer};
use beacon_core::{Guarded, IllegalTransition, State, StreamId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalStreamState {
    Ready,
    Starting,
    Started,
    Publishing,
    Published,
    Unpublishing,
    Stopping,
    Failed,
}

impl State for LocalStreamState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            LocalStreamState::Ready => &[LocalStreamState::Starting],
            LocalStreamState::Starting => &[LocalStreamState::Started, LocalStreamState::Failed],
            LocalStreamState::Started => &[LocalStreamState::Publishing, LocalStreamState::Stopping],
            // A rejected publish or a server-side disposal falls back to
            // Started; the capture stays acquired for the next attempt.
            LocalStreamState::Publishing => &[
                LocalStreamState::Published,
                LocalStreamState::Started,
                LocalStreamState::Failed,
            ],
            LocalStreamState::Published => &[
                LocalStreamState::Unpublishing,
                LocalStreamState::Started,
                LocalStreamState::Failed,
            ],
            LocalStreamState::Unpublishing => &[LocalStreamState::Started],
            LocalStreamState::Stopping => &[LocalStreamState::Ready],
            LocalStreamState::Failed => &[],
        }
    }
}

/// Mirror of one of this client's publications: the capture it feeds from
/// and, while negotiating or published, the send peer carrying it.
pub struct LocalStream {
    pub id: StreamId,
    fsm: Guarded<LocalStreamState>,
    capture: Arc<dyn MediaCapture>,
    peer: Option<Arc<dyn MediaPeer>>,
}

impl LocalStream {
    pub fn new(id: StreamId, capture: Arc<dyn MediaCapture>) -> Self {
        Self {
            id,
            fsm: Guarded::new(LocalStreamState::Ready),
            capture,
            peer: None,
        }
    }

    pub fn state(&self) -> LocalStreamState {
        self.fsm.get()
    }

    pub fn peer(&self) -> Option<Arc<dyn MediaPeer>> {
        self.peer.clone()
    }

    pub(crate) async fn start(&mut self) -> Result<(), ClientError> {
        self.fsm.set(LocalStreamState::Starting)?;
        if let Err(e) = self.capture.start().await {
            let _ = self.fsm.set(LocalStreamState::Failed);
            return Err(e);
        }
        self.fsm.set(LocalStreamState::Started)?;
        Ok(())
    }

    pub(crate) fn begin_publish(
        &mut self,
        peer: Arc<dyn MediaPeer>,
    ) -> Result<(), IllegalTransition> {
        self.fsm.set(LocalStreamState::Publishing)?;
        self.peer = Some(peer);
        Ok(())
    }

    pub(crate) fn mark_published(&mut self) -> Result<(), IllegalTransition> {
        self.fsm.set(LocalStreamState::Published)
    }

    /// Back to Started, closing the peer; the capture stays acquired.
    pub(crate) fn revert_to_started(&mut self) {
        let _ = self.fsm.set(LocalStreamState::Started);
        if let Some(peer) = self.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }
    }

    pub(crate) fn begin_unpublish(&mut self) -> Result<(), IllegalTransition> {
        self.fsm.set(LocalStreamState::Unpublishing)
    }

    pub(crate) async fn stop(&mut self) -> Result<(), ClientError> {
        self.fsm.set(LocalStreamState::Stopping)?;
        self.capture.stop().await;
        self.fsm.set(LocalStreamState::Ready)?;
        Ok(())
    }

    /// Teardown on room departure: peer and capture both go, whatever
    /// state the stream was in.
    pub(crate) fn shutdown(mut self) {
        if let Some(peer) = self.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }
        let capture = self.capture;
        tokio::spawn(async move { capture.stop().await });
    }
}
