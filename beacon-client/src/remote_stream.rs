use crate::peer::MediaPeer;
use beacon_core::{Guarded, IllegalTransition, SinkId, State, StreamId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteStreamState {
    Ready,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Failed,
}

impl State for RemoteStreamState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            RemoteStreamState::Ready => &[RemoteStreamState::Subscribing],
            // A rejected subscribe returns the stub to Ready.
            RemoteStreamState::Subscribing => &[
                RemoteStreamState::Subscribed,
                RemoteStreamState::Ready,
                RemoteStreamState::Failed,
            ],
            RemoteStreamState::Subscribed => &[
                RemoteStreamState::Unsubscribing,
                RemoteStreamState::Ready,
                RemoteStreamState::Failed,
            ],
            RemoteStreamState::Unsubscribing => &[RemoteStreamState::Ready],
            RemoteStreamState::Failed => &[],
        }
    }
}

/// Mirror of another participant's published stream. Materialized as a
/// stub from the roster alerts; carries a sink id and a receive peer only
/// while a subscription is negotiating or live.
pub struct RemoteStream {
    /// Source stream this mirror tracks.
    pub stream: StreamId,
    fsm: Guarded<RemoteStreamState>,
    sink: Option<SinkId>,
    peer: Option<Arc<dyn MediaPeer>>,
}

impl RemoteStream {
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            fsm: Guarded::new(RemoteStreamState::Ready),
            sink: None,
            peer: None,
        }
    }

    pub fn state(&self) -> RemoteStreamState {
        self.fsm.get()
    }

    pub fn sink_id(&self) -> Option<&SinkId> {
        self.sink.as_ref()
    }

    pub fn peer(&self) -> Option<Arc<dyn MediaPeer>> {
        self.peer.clone()
    }

    pub(crate) fn begin_subscribe(
        &mut self,
        sink: SinkId,
        peer: Arc<dyn MediaPeer>,
    ) -> Result<(), IllegalTransition> {
        self.fsm.set(RemoteStreamState::Subscribing)?;
        self.sink = Some(sink);
        self.peer = Some(peer);
        Ok(())
    }

    pub(crate) fn mark_subscribed(&mut self) -> Result<(), IllegalTransition> {
        self.fsm.set(RemoteStreamState::Subscribed)
    }

    pub(crate) fn begin_unsubscribe(&mut self) -> Result<(), IllegalTransition> {
        self.fsm.set(RemoteStreamState::Unsubscribing)
    }

    /// Back to the unsubscribed stub, closing the peer.
    pub(crate) fn reset(&mut self) {
        let _ = self.fsm.set(RemoteStreamState::Ready);
        self.sink = None;
        if let Some(peer) = self.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }
    }

    /// Teardown when the source stream disappears or the room is left.
    pub(crate) fn shutdown(mut self) {
        if let Some(peer) = self.peer.take() {
            tokio::spawn(async move { peer.close().await });
        }
    }
}
