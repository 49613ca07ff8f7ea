use crate::connection::Connection;
use crate::error::ClientError;
use crate::events::{ClientRoomEvent, ClientRoomEventKind};
use crate::local_stream::{LocalStream, LocalStreamState};
use crate::peer::PeerFactory;
use crate::remote_stream::{RemoteStream, RemoteStreamState};
use beacon_core::{
    Action, Alert, Dispatcher, Guarded, ParticipantId, ResourceKind, SinkId, State, StreamId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoomMirrorState {
    Ready,
    Connecting,
    Connected,
    Joining,
    Joined,
    Leaving,
}

impl State for RoomMirrorState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            RoomMirrorState::Ready => &[RoomMirrorState::Connecting],
            // A failed dial falls back to Ready.
            RoomMirrorState::Connecting => &[RoomMirrorState::Connected, RoomMirrorState::Ready],
            RoomMirrorState::Connected => &[RoomMirrorState::Joining, RoomMirrorState::Ready],
            // A rejected join leaves the socket open for another attempt.
            RoomMirrorState::Joining => &[RoomMirrorState::Joined, RoomMirrorState::Connected],
            RoomMirrorState::Joined => &[RoomMirrorState::Leaving],
            RoomMirrorState::Leaving => &[RoomMirrorState::Ready],
        }
    }
}

/// Client-side mirror of the room: tracks the rosters the server
/// advertises, owns this client's publications and subscriptions, and
/// re-emits every applied alert as a typed event on its dispatcher.
///
/// All operations drive the connection until the confirming alert (or an
/// error alert) arrives; alerts received on the way are applied to the
/// mirror first, so the view stays consistent regardless of interleaving.
pub struct Room {
    url: String,
    connection: Connection,
    factory: Arc<dyn PeerFactory>,
    fsm: Guarded<RoomMirrorState>,
    events: Dispatcher<ClientRoomEvent>,
    ready: bool,
    id: Option<ParticipantId>,
    participants: HashSet<ParticipantId>,
    local_streams: HashMap<StreamId, LocalStream>,
    /// One mirror per advertised source stream; holds the sink while a
    /// subscription is live.
    remote_streams: HashMap<StreamId, RemoteStream>,
}

impl Room {
    pub fn new(url: impl Into<String>, factory: Arc<dyn PeerFactory>) -> Self {
        Self {
            url: url.into(),
            connection: Connection::new(),
            factory,
            fsm: Guarded::new(RoomMirrorState::Ready),
            events: Dispatcher::new(),
            ready: false,
            id: None,
            participants: HashSet::new(),
            local_streams: HashMap::new(),
            remote_streams: HashMap::new(),
        }
    }

    pub fn state(&self) -> RoomMirrorState {
        self.fsm.get()
    }

    pub fn on(
        &self,
        kind: ClientRoomEventKind,
        listener: impl Fn(&ClientRoomEvent) + Send + 'static,
    ) {
        self.events.on(kind, listener);
    }

    pub fn participant_id(&self) -> Option<&ParticipantId> {
        self.id.as_ref()
    }

    pub fn participants(&self) -> &HashSet<ParticipantId> {
        &self.participants
    }

    /// Source streams currently advertised by the room.
    pub fn available_streams(&self) -> HashSet<StreamId> {
        self.remote_streams.keys().cloned().collect()
    }

    pub fn local_stream(&self, id: &StreamId) -> Option<&LocalStream> {
        self.local_streams.get(id)
    }

    pub fn remote_stream(&self, source: &StreamId) -> Option<&RemoteStream> {
        self.remote_streams.get(source)
    }

    /// Opens the signaling socket if it is not open yet.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.fsm.get() != RoomMirrorState::Ready {
            return Ok(());
        }
        self.fsm.set(RoomMirrorState::Connecting)?;
        if let Err(e) = self.connection.open(&self.url).await {
            let _ = self.fsm.set(RoomMirrorState::Ready);
            return Err(e);
        }
        self.fsm.set(RoomMirrorState::Connected)?;
        Ok(())
    }

    /// Blocks until the server reports its media pipeline up, connecting
    /// first if needed. There is no timeout here; callers wrap this in
    /// their own deadline if they need one.
    pub async fn wait_ready(&mut self) -> Result<(), ClientError> {
        self.connect().await?;
        if self.ready {
            return Ok(());
        }
        self.pump_until(|alert| matches!(alert, Alert::Ready))
            .await?;
        Ok(())
    }

    pub async fn join(&mut self, id: ParticipantId) -> Result<(), ClientError> {
        self.wait_ready().await?;
        self.fsm.set(RoomMirrorState::Joining)?;
        self.connection.send(Action::Join { id })?;
        let alert = self
            .pump_until(|alert| matches!(alert, Alert::Joined { .. } | Alert::Error { .. }))
            .await?;
        match alert {
            Alert::Joined { .. } => {
                self.fsm.set(RoomMirrorState::Joined)?;
                Ok(())
            }
            Alert::Error { message } => {
                let _ = self.fsm.set(RoomMirrorState::Connected);
                Err(ClientError::Server(message))
            }
            _ => Err(ClientError::Protocol("unexpected join response".into())),
        }
    }

    pub async fn leave(&mut self) -> Result<(), ClientError> {
        self.fsm.set(RoomMirrorState::Leaving)?;
        self.connection.send(Action::Leave)?;
        let alert = self
            .pump_until(|alert| matches!(alert, Alert::Left | Alert::Error { .. }))
            .await?;
        match alert {
            // `apply` has already reset the mirror and closed the socket.
            Alert::Left => Ok(()),
            Alert::Error { message } => Err(ClientError::Server(message)),
            _ => Err(ClientError::Protocol("unexpected leave response".into())),
        }
    }

    /// Negotiates a publication: acquires capture on first use, wires a
    /// fresh send peer's candidates to the connection, sends its offer,
    /// and applies the server's answer.
    pub async fn publish(&mut self, id: StreamId) -> Result<(), ClientError> {
        if self.fsm.get() != RoomMirrorState::Joined {
            return Err(ClientError::Protocol("not joined".into()));
        }
        if !self.local_streams.contains_key(&id) {
            let capture = self.factory.create_capture().await?;
            let mut local = LocalStream::new(id.clone(), capture);
            local.start().await?;
            self.local_streams.insert(id.clone(), local);
        }
        let state = self.local_streams.get(&id).map(LocalStream::state);
        if state != Some(LocalStreamState::Started) {
            return Err(ClientError::Protocol("stream already published".into()));
        }
        let peer = self.factory.create_send_peer().await?;
        let sender = self.connection.sender()?;
        let tagged = id.as_str().to_string();
        peer.on_local_candidate(Box::new(move |candidate| {
            let _ = sender.send(Action::IceCandidate {
                id: tagged.clone(),
                kind: ResourceKind::Stream,
                candidate,
            });
        }));
        let sdp_offer = peer.create_offer().await?;
        if let Some(local) = self.local_streams.get_mut(&id) {
            local.begin_publish(peer)?;
        }
        self.connection.send(Action::Publish {
            id: id.clone(),
            sdp_offer,
        })?;
        let want = id.clone();
        let alert = self
            .pump_until(move |alert| match alert {
                Alert::Published { id, .. } => *id == want,
                Alert::Error { .. } => true,
                _ => false,
            })
            .await?;
        match alert {
            Alert::Published { sdp_answer, .. } => {
                let peer = self.local_streams.get(&id).and_then(LocalStream::peer);
                if let Some(peer) = peer {
                    peer.apply_answer(&sdp_answer).await?;
                }
                Ok(())
            }
            Alert::Error { message } => {
                if let Some(local) = self.local_streams.get_mut(&id) {
                    local.revert_to_started();
                }
                Err(ClientError::Server(message))
            }
            _ => Err(ClientError::Protocol("unexpected publish response".into())),
        }
    }

    /// Ends the publication; the stream returns to Started with its
    /// capture still acquired.
    pub async fn unpublish(&mut self, id: StreamId) -> Result<(), ClientError> {
        let Some(local) = self.local_streams.get_mut(&id) else {
            return Err(ClientError::Protocol("unknown local stream".into()));
        };
        local.begin_unpublish()?;
        self.connection.send(Action::Unpublish { id: id.clone() })?;
        let want = id.clone();
        let alert = self
            .pump_until(move |alert| match alert {
                Alert::Unpublished { id } => *id == want,
                Alert::Error { .. } => true,
                _ => false,
            })
            .await?;
        match alert {
            Alert::Unpublished { .. } => Ok(()),
            Alert::Error { message } => {
                if let Some(local) = self.local_streams.get_mut(&id) {
                    local.revert_to_started();
                }
                Err(ClientError::Server(message))
            }
            _ => Err(ClientError::Protocol("unexpected unpublish response".into())),
        }
    }

    /// Releases a stopped stream's capture and forgets it.
    pub async fn stop(&mut self, id: StreamId) -> Result<(), ClientError> {
        let Some(local) = self.local_streams.get_mut(&id) else {
            return Err(ClientError::Protocol("unknown local stream".into()));
        };
        local.stop().await?;
        self.local_streams.remove(&id);
        Ok(())
    }

    /// Negotiates a subscription to `stream_id` and returns the id of the
    /// created sink.
    pub async fn subscribe(&mut self, stream_id: StreamId) -> Result<SinkId, ClientError> {
        if self.fsm.get() != RoomMirrorState::Joined {
            return Err(ClientError::Protocol("not joined".into()));
        }
        let state = self
            .remote_streams
            .get(&stream_id)
            .map(RemoteStream::state)
            .unwrap_or(RemoteStreamState::Ready);
        if state != RemoteStreamState::Ready {
            return Err(ClientError::Protocol("already subscribed".into()));
        }
        let sink = SinkId::generate();
        let peer = self.factory.create_recv_peer().await?;
        let sender = self.connection.sender()?;
        let tagged = sink.as_str().to_string();
        peer.on_local_candidate(Box::new(move |candidate| {
            let _ = sender.send(Action::IceCandidate {
                id: tagged.clone(),
                kind: ResourceKind::Sink,
                candidate,
            });
        }));
        let sdp_offer = peer.create_offer().await?;
        let remote = self
            .remote_streams
            .entry(stream_id.clone())
            .or_insert_with(|| RemoteStream::new(stream_id.clone()));
        remote.begin_subscribe(sink.clone(), peer)?;
        self.connection.send(Action::Subscribe {
            stream_id: stream_id.clone(),
            id: sink.clone(),
            sdp_offer,
        })?;
        let want = stream_id.clone();
        let alert = self
            .pump_until(move |alert| match alert {
                Alert::Subscribed { stream_id, .. } => *stream_id == want,
                Alert::Error { .. } => true,
                _ => false,
            })
            .await?;
        match alert {
            Alert::Subscribed { id, sdp_answer, .. } => {
                if id != sink {
                    if let Some(remote) = self.remote_streams.get_mut(&stream_id) {
                        remote.reset();
                    }
                    return Err(ClientError::Protocol(format!(
                        "subscribed alert for unexpected sink {id}"
                    )));
                }
                let peer = self.remote_streams.get(&stream_id).and_then(RemoteStream::peer);
                if let Some(peer) = peer {
                    peer.apply_answer(&sdp_answer).await?;
                }
                Ok(sink)
            }
            Alert::Error { message } => {
                if let Some(remote) = self.remote_streams.get_mut(&stream_id) {
                    remote.reset();
                }
                Err(ClientError::Server(message))
            }
            _ => Err(ClientError::Protocol("unexpected subscribe response".into())),
        }
    }

    pub async fn unsubscribe(&mut self, stream_id: StreamId) -> Result<(), ClientError> {
        let Some(remote) = self.remote_streams.get_mut(&stream_id) else {
            return Err(ClientError::Protocol("unknown subscription".into()));
        };
        let Some(sink) = remote.sink_id().cloned() else {
            return Err(ClientError::Protocol("unknown subscription".into()));
        };
        remote.begin_unsubscribe()?;
        self.connection.send(Action::Unsubscribe { id: sink })?;
        let want = stream_id.clone();
        let alert = self
            .pump_until(move |alert| match alert {
                Alert::Unsubscribed { stream_id, .. } => *stream_id == want,
                Alert::Error { .. } => true,
                _ => false,
            })
            .await?;
        match alert {
            Alert::Unsubscribed { .. } => Ok(()),
            Alert::Error { message } => {
                if let Some(remote) = self.remote_streams.get_mut(&stream_id) {
                    remote.reset();
                }
                Err(ClientError::Server(message))
            }
            _ => Err(ClientError::Protocol(
                "unexpected unsubscribe response".into(),
            )),
        }
    }

    /// Applies the next alert to the mirror. Useful between operations to
    /// keep the view current without waiting for anything specific.
    pub async fn pump_one(&mut self) -> Result<Alert, ClientError> {
        let Some(alert) = self.connection.recv().await else {
            return Err(ClientError::ConnectionClosed);
        };
        self.apply(&alert);
        Ok(alert)
    }

    async fn pump_until(
        &mut self,
        mut stop: impl FnMut(&Alert) -> bool,
    ) -> Result<Alert, ClientError> {
        loop {
            let Some(alert) = self.connection.recv().await else {
                return Err(ClientError::ConnectionClosed);
            };
            let matched = stop(&alert);
            self.apply(&alert);
            if matched {
                return Ok(alert);
            }
        }
    }

    fn apply(&mut self, alert: &Alert) {
        match alert {
            Alert::Ready => self.ready = true,
            Alert::Joined {
                id,
                participants,
                streams,
            } => {
                self.id = Some(id.clone());
                self.participants = participants
                    .iter()
                    .filter(|r| r.kind == ResourceKind::Participant)
                    .map(|r| ParticipantId::from(r.id.as_str()))
                    .collect();
                for r in streams.iter().filter(|r| r.kind == ResourceKind::Stream) {
                    let source = StreamId::from(r.id.as_str());
                    self.remote_streams
                        .entry(source.clone())
                        .or_insert_with(|| RemoteStream::new(source));
                }
                // Fixed emission order: the join itself, then the rosters.
                self.events.emit(ClientRoomEvent::Joined { id: id.clone() });
                if !self.participants.is_empty() {
                    self.events.emit(ClientRoomEvent::ParticipantsJoined {
                        items: self.participants.iter().cloned().collect(),
                    });
                }
                if !self.remote_streams.is_empty() {
                    self.events.emit(ClientRoomEvent::StreamsCreated {
                        items: self.remote_streams.keys().cloned().collect(),
                    });
                }
            }
            Alert::Left => {
                self.id = None;
                self.participants.clear();
                for (_, local) in self.local_streams.drain() {
                    local.shutdown();
                }
                for (_, remote) in self.remote_streams.drain() {
                    remote.shutdown();
                }
                // An unsolicited `left` while joined follows the same exit
                // path a local `leave` does.
                if self.fsm.get() == RoomMirrorState::Joined {
                    let _ = self.fsm.set(RoomMirrorState::Leaving);
                }
                let _ = self.fsm.set(RoomMirrorState::Ready);
                let _ = self.connection.close();
                self.ready = false;
                self.events.emit(ClientRoomEvent::Left);
            }
            Alert::ParticipantsJoined { items } => {
                let items: Vec<ParticipantId> = items
                    .iter()
                    .filter(|r| r.kind == ResourceKind::Participant)
                    .map(|r| ParticipantId::from(r.id.as_str()))
                    .collect();
                self.participants.extend(items.iter().cloned());
                self.events.emit(ClientRoomEvent::ParticipantsJoined { items });
            }
            Alert::ParticipantsLeft { items } => {
                let items: Vec<ParticipantId> = items
                    .iter()
                    .map(|r| ParticipantId::from(r.id.as_str()))
                    .collect();
                for id in &items {
                    self.participants.remove(id);
                }
                self.events.emit(ClientRoomEvent::ParticipantsLeft { items });
            }
            Alert::StreamsCreated { items } => {
                let items: Vec<StreamId> = items
                    .iter()
                    .filter(|r| r.kind == ResourceKind::Stream)
                    .map(|r| StreamId::from(r.id.as_str()))
                    .collect();
                for source in &items {
                    self.remote_streams
                        .entry(source.clone())
                        .or_insert_with(|| RemoteStream::new(source.clone()));
                }
                self.events.emit(ClientRoomEvent::StreamsCreated { items });
            }
            Alert::StreamsUpdated { items } => {
                let items: Vec<StreamId> = items
                    .iter()
                    .map(|r| StreamId::from(r.id.as_str()))
                    .collect();
                self.events.emit(ClientRoomEvent::StreamsUpdated { items });
            }
            Alert::StreamsDestroyed { items } => {
                let items: Vec<StreamId> = items
                    .iter()
                    .map(|r| StreamId::from(r.id.as_str()))
                    .collect();
                for source in &items {
                    if let Some(remote) = self.remote_streams.remove(source) {
                        remote.shutdown();
                    }
                }
                self.events.emit(ClientRoomEvent::StreamsDestroyed { items });
            }
            Alert::Published { id, .. } => {
                if let Some(local) = self.local_streams.get_mut(id) {
                    let _ = local.mark_published();
                    self.events.emit(ClientRoomEvent::Published { id: id.clone() });
                }
            }
            Alert::Unpublished { id } => {
                if let Some(local) = self.local_streams.get_mut(id) {
                    local.revert_to_started();
                    self.events.emit(ClientRoomEvent::Unpublished { id: id.clone() });
                }
            }
            Alert::Subscribed { stream_id, id, .. } => {
                match self.remote_streams.get_mut(stream_id) {
                    Some(remote) if remote.sink_id() == Some(id) => {
                        let _ = remote.mark_subscribed();
                        self.events.emit(ClientRoomEvent::Subscribed {
                            stream_id: stream_id.clone(),
                            id: id.clone(),
                        });
                    }
                    _ => warn!(sink = %id, "subscribed alert for unknown sink"),
                }
            }
            Alert::Unsubscribed { stream_id, id } => {
                match self.remote_streams.get_mut(stream_id) {
                    Some(remote) if remote.sink_id() == Some(id) => {
                        remote.reset();
                        self.events.emit(ClientRoomEvent::Unsubscribed {
                            stream_id: stream_id.clone(),
                            id: id.clone(),
                        });
                    }
                    _ => warn!(sink = %id, "unsubscribed alert for unknown sink"),
                }
            }
            Alert::IceCandidate {
                kind,
                id,
                stream_id,
                candidate,
            } => self.route_candidate(*kind, id, stream_id.as_ref(), candidate.clone()),
            Alert::Error { message } => {
                debug!(message, "server error alert");
                self.events.emit(ClientRoomEvent::Error {
                    message: message.clone(),
                });
            }
        }
    }

    /// Stream candidates route by stream id; sink candidates route by the
    /// source stream id they carry, with the sink id cross-checked.
    fn route_candidate(
        &self,
        kind: ResourceKind,
        id: &str,
        stream_id: Option<&StreamId>,
        candidate: beacon_core::IceCandidate,
    ) {
        match kind {
            ResourceKind::Stream => {
                let peer = self
                    .local_streams
                    .get(&StreamId::from(id))
                    .and_then(LocalStream::peer);
                let Some(peer) = peer else {
                    warn!(stream = id, "candidate for unknown local stream dropped");
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = peer.add_remote_candidate(candidate).await {
                        warn!("peer rejected remote candidate: {e}");
                    }
                });
            }
            ResourceKind::Sink => {
                let remote = stream_id.and_then(|sid| self.remote_streams.get(sid));
                let Some(remote) = remote else {
                    warn!(sink = id, "candidate for unknown sink dropped");
                    return;
                };
                if remote.sink_id().map(|s| s.as_str()) != Some(id) {
                    warn!(sink = id, "candidate sink id mismatch, dropped");
                    return;
                }
                let Some(peer) = remote.peer() else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(e) = peer.add_remote_candidate(candidate).await {
                        warn!("peer rejected remote candidate: {e}");
                    }
                });
            }
            _ => warn!(?kind, "candidate with unroutable kind dropped"),
        }
    }
}
