use crate::engine::{MediaEndpoint, MediaEngine, MediaPipeline};
use crate::room::command::{
    EngineEvent, NegotiationTarget, PipelineStatus, RoomCommand, RoomSnapshot,
};
use crate::room::error::RoomError;
use crate::room::events::{ParticipantEvent, ParticipantEventKind, RoomEvent, RoomEventKind};
use crate::room::handle::RoomHandle;
use crate::room::participant::Participant;
use crate::room::sink::{Sink, SinkState};
use crate::room::stream::{Stream, StreamState};
use crate::signaling::AlertSink;
use beacon_core::{
    Alert, Dispatcher, Guarded, IceCandidate, ParticipantId, ResourceKind, ResourceRef, SinkId,
    State, StreamId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoomState {
    New,
    Creating,
    Ready,
    PipelineFailed,
}

impl State for RoomState {
    fn transitions(&self) -> &'static [Self] {
        match self {
            RoomState::New => &[RoomState::Creating],
            // Creating -> New covers a release racing pipeline creation.
            RoomState::Creating => &[RoomState::Ready, RoomState::PipelineFailed, RoomState::New],
            RoomState::Ready => &[RoomState::New],
            RoomState::PipelineFailed => &[RoomState::New],
        }
    }
}

/// The control-plane authority for one room: a single task owning every
/// participant, stream and sink, fed by commands from sessions and by
/// completions of spawned engine calls.
///
/// Engine calls never run on this task. Each negotiation stage is spawned
/// and re-enters the loop as an [`EngineEvent`]; the handler re-validates
/// that its resource is still present before committing, and releases the
/// fresh engine object when the race was lost.
pub struct Room {
    fsm: Guarded<RoomState>,
    engine: Arc<dyn MediaEngine>,
    pipeline: Option<Arc<dyn MediaPipeline>>,
    participants: HashMap<ParticipantId, Participant>,
    streams: HashMap<StreamId, Stream>,
    sinks: HashMap<SinkId, Sink>,
    dispatcher: Dispatcher<RoomEvent>,
    alerts: Arc<dyn AlertSink>,
    command_tx: mpsc::Sender<RoomCommand>,
    command_rx: mpsc::Receiver<RoomCommand>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    sweep_interval: Duration,
    next_epoch: u64,
}

impl Room {
    /// Must be called from within a tokio runtime.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        alerts: Arc<dyn AlertSink>,
        sweep_interval: Duration,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new();
        wire_broadcasts(&dispatcher, &alerts);
        Self {
            fsm: Guarded::new(RoomState::New),
            engine,
            pipeline: None,
            participants: HashMap::new(),
            streams: HashMap::new(),
            sinks: HashMap::new(),
            dispatcher,
            alerts,
            command_tx,
            command_rx,
            engine_tx,
            engine_rx,
            sweep_interval,
            next_epoch: 0,
        }
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    pub fn handle(&self) -> RoomHandle {
        RoomHandle::new(self.command_tx.clone())
    }

    /// Subscribes to room-scoped events. Used by the server binary for
    /// logging and by tests for observation.
    pub fn on(&self, kind: RoomEventKind, listener: impl Fn(&RoomEvent) + Send + 'static) {
        self.dispatcher.on(kind, listener);
    }

    pub fn spawn(self) -> RoomHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }

    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.engine_rx.recv() => self.handle_engine_event(event),
                _ = sweep.tick() => self.sweep(),
            }
        }
        info!("room loop stopped");
    }

    fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::EnsurePipeline { reply } => {
                let _ = reply.send(self.ensure_pipeline());
            }
            RoomCommand::ReleasePipeline { reply } => {
                self.release_pipeline();
                let _ = reply.send(Ok(()));
            }
            RoomCommand::Join { id, reply } => {
                let _ = reply.send(self.join(id));
            }
            RoomCommand::Leave { id, reply } => {
                let result = if self.participants.contains_key(&id) {
                    self.dispose_participant(&id);
                    Ok(())
                } else {
                    Err(RoomError::ParticipantNotFound)
                };
                let _ = reply.send(result);
            }
            RoomCommand::Disconnect { id } => {
                if self.participants.contains_key(&id) {
                    debug!(participant = %id, "session dropped, disposing");
                    self.dispose_participant(&id);
                }
            }
            RoomCommand::Publish {
                participant,
                stream,
                sdp_offer,
                reply,
            } => {
                let _ = reply.send(self.create_stream(participant, stream, sdp_offer));
            }
            RoomCommand::Unpublish {
                participant,
                stream,
                reply,
            } => {
                let result = match self.streams.get(&stream) {
                    None => Err(RoomError::StreamNotFound),
                    Some(s) if s.owner != participant => Err(RoomError::NotStreamOwner),
                    Some(_) => {
                        self.dispose_stream(&stream);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            RoomCommand::Subscribe {
                participant,
                stream,
                sink,
                sdp_offer,
                reply,
            } => {
                let _ = reply.send(self.create_sink(participant, stream, sink, sdp_offer));
            }
            RoomCommand::Unsubscribe {
                participant,
                sink,
                reply,
            } => {
                let result = match self.sinks.get(&sink) {
                    None => Err(RoomError::SinkNotFound),
                    Some(s) if s.owner != participant => Err(RoomError::NotSinkOwner),
                    Some(_) => {
                        self.dispose_sink(&sink);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            RoomCommand::Candidate {
                participant,
                resource,
                kind,
                candidate,
                reply,
            } => {
                let _ = reply.send(self.receive_candidate(participant, resource, kind, candidate));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            state: self.fsm.get(),
            has_pipeline: self.pipeline.is_some(),
            participants: self.participants.len(),
            streams: self.streams.len(),
            sinks: self.sinks.len(),
        }
    }

    fn ensure_pipeline(&mut self) -> Result<PipelineStatus, RoomError> {
        match self.fsm.get() {
            RoomState::Ready => Ok(PipelineStatus::Ready),
            RoomState::Creating => Ok(PipelineStatus::Creating),
            RoomState::PipelineFailed => Ok(PipelineStatus::Failed),
            RoomState::New => {
                self.fsm.set(RoomState::Creating)?;
                info!("creating media pipeline");
                let engine = Arc::clone(&self.engine);
                let tx = self.engine_tx.clone();
                tokio::spawn(async move {
                    let result = engine.create_pipeline().await;
                    let _ = tx.send(EngineEvent::PipelineReady(result));
                });
                Ok(PipelineStatus::Creating)
            }
        }
    }

    /// Tears the pipeline down along with every media resource. The room
    /// returns to New and may be re-ensured later.
    fn release_pipeline(&mut self) {
        let stream_ids: Vec<StreamId> = self.streams.keys().cloned().collect();
        for id in &stream_ids {
            self.dispose_stream(id);
        }
        let sink_ids: Vec<SinkId> = self.sinks.keys().cloned().collect();
        for id in &sink_ids {
            self.dispose_sink(id);
        }
        if let Some(pipeline) = self.pipeline.take() {
            tokio::spawn(async move { pipeline.release().await });
        }
        if self.fsm.get() != RoomState::New && self.fsm.set(RoomState::New).is_ok() {
            info!("pipeline released");
            self.dispatcher.emit(RoomEvent::Released);
        }
    }

    fn join(&mut self, id: ParticipantId) -> Result<(), RoomError> {
        if self.fsm.get() != RoomState::Ready {
            return Err(RoomError::RoomNotReady);
        }
        if self.participants.contains_key(&id) {
            return Err(RoomError::ParticipantExists);
        }
        // Snapshot before insertion: the joiner never lists itself.
        let existing: Vec<ResourceRef> = self
            .participants
            .keys()
            .map(|p| ResourceRef::new(ResourceKind::Participant, p.as_str()))
            .collect();
        let available: Vec<ResourceRef> = self
            .streams
            .values()
            .filter(|s| s.state() == StreamState::Ready)
            .map(|s| ResourceRef::new(ResourceKind::Stream, s.id.as_str()))
            .collect();
        let participant = Participant::new(id.clone());
        wire_session(
            &participant,
            &self.alerts,
            Alert::Joined {
                id: id.clone(),
                participants: existing,
                streams: available,
            },
        );
        participant.dispatcher.emit(ParticipantEvent::Created);
        self.participants.insert(id.clone(), participant);
        info!(participant = %id, "participant joined");
        self.dispatcher.emit(RoomEvent::ParticipantCreated { id });
        Ok(())
    }

    fn create_stream(
        &mut self,
        participant: ParticipantId,
        id: StreamId,
        sdp_offer: String,
    ) -> Result<(), RoomError> {
        if self.fsm.get() != RoomState::Ready {
            return Err(RoomError::RoomNotReady);
        }
        if !self.participants.contains_key(&participant) {
            return Err(RoomError::ParticipantNotFound);
        }
        if self.streams.contains_key(&id) {
            return Err(RoomError::StreamExists);
        }
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(RoomError::RoomNotReady);
        };
        let epoch = self.bump_epoch();
        let mut stream = Stream::new(id.clone(), participant.clone(), epoch);
        stream.transition(StreamState::Creating)?;
        stream.pending_offer = Some(sdp_offer);
        self.streams.insert(id.clone(), stream);
        if let Some(owner) = self.participants.get_mut(&participant) {
            owner.streams.insert(id.clone());
        }
        debug!(participant = %participant, stream = %id, "stream negotiation started");
        let tx = self.engine_tx.clone();
        tokio::spawn(async move {
            let result = pipeline.create_endpoint().await;
            let _ = tx.send(EngineEvent::EndpointReady(
                NegotiationTarget::Stream(id, epoch),
                result,
            ));
        });
        Ok(())
    }

    fn create_sink(
        &mut self,
        participant: ParticipantId,
        stream_id: StreamId,
        id: SinkId,
        sdp_offer: String,
    ) -> Result<(), RoomError> {
        if self.fsm.get() != RoomState::Ready {
            return Err(RoomError::RoomNotReady);
        }
        if !self.participants.contains_key(&participant) {
            return Err(RoomError::ParticipantNotFound);
        }
        if !self.streams.contains_key(&stream_id) {
            return Err(RoomError::StreamNotFound);
        }
        if self.sinks.contains_key(&id) {
            return Err(RoomError::SinkExists);
        }
        // Re-subscribing to a source replaces the previous sink.
        let previous = self
            .participants
            .get(&participant)
            .and_then(|p| p.sinks_by_stream.get(&stream_id).cloned());
        if let Some(previous) = previous {
            self.dispose_sink(&previous);
        }
        let source_ready = self
            .streams
            .get(&stream_id)
            .map(|s| s.state() == StreamState::Ready)
            .unwrap_or(false);
        if !source_ready {
            return Err(RoomError::StreamNotReady);
        }
        let Some(pipeline) = self.pipeline.clone() else {
            return Err(RoomError::RoomNotReady);
        };
        let epoch = self.bump_epoch();
        let mut sink = Sink::new(id.clone(), participant.clone(), stream_id.clone(), epoch);
        sink.transition(SinkState::Creating)?;
        sink.pending_offer = Some(sdp_offer);
        self.sinks.insert(id.clone(), sink);
        if let Some(owner) = self.participants.get_mut(&participant) {
            owner.sinks_by_stream.insert(stream_id.clone(), id.clone());
        }
        debug!(participant = %participant, stream = %stream_id, sink = %id, "sink negotiation started");
        let tx = self.engine_tx.clone();
        tokio::spawn(async move {
            let result = pipeline.create_endpoint().await;
            let _ = tx.send(EngineEvent::EndpointReady(
                NegotiationTarget::Sink(id, epoch),
                result,
            ));
        });
        Ok(())
    }

    fn receive_candidate(
        &mut self,
        participant: ParticipantId,
        resource: String,
        kind: ResourceKind,
        candidate: IceCandidate,
    ) -> Result<(), RoomError> {
        if !self.participants.contains_key(&participant) {
            return Err(RoomError::ParticipantNotFound);
        }
        match kind {
            ResourceKind::Stream => {
                let id = StreamId::from(resource);
                let stream = self.streams.get_mut(&id).ok_or(RoomError::StreamNotFound)?;
                if stream.owner != participant {
                    return Err(RoomError::NotStreamOwner);
                }
                match stream.endpoint.clone() {
                    Some(endpoint) => {
                        let target = NegotiationTarget::Stream(id, stream.epoch);
                        let tx = self.engine_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = endpoint.add_ice_candidate(candidate).await {
                                let _ = tx.send(EngineEvent::CandidateRejected(target, e));
                            }
                        });
                    }
                    None => stream.candidate_queue.push(candidate),
                }
                Ok(())
            }
            ResourceKind::Sink => {
                let id = SinkId::from(resource);
                let sink = self.sinks.get_mut(&id).ok_or(RoomError::SinkNotFound)?;
                if sink.owner != participant {
                    return Err(RoomError::NotSinkOwner);
                }
                match sink.endpoint.clone() {
                    Some(endpoint) => {
                        let target = NegotiationTarget::Sink(id, sink.epoch);
                        let tx = self.engine_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = endpoint.add_ice_candidate(candidate).await {
                                let _ = tx.send(EngineEvent::CandidateRejected(target, e));
                            }
                        });
                    }
                    None => sink.candidate_queue.push(candidate),
                }
                Ok(())
            }
            ResourceKind::Room | ResourceKind::Participant => {
                Err(RoomError::InvalidResourceKind)
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::PipelineReady(result) => self.pipeline_ready(result),
            EngineEvent::EndpointReady(target, result) => match result {
                Ok(endpoint) => self.attach_endpoint(target, endpoint),
                Err(e) => match target {
                    NegotiationTarget::Stream(id, epoch) => {
                        self.fail_stream(&id, epoch, StreamState::EndpointFailed, e.to_string())
                    }
                    NegotiationTarget::Sink(id, epoch) => {
                        self.fail_sink(&id, epoch, SinkState::EndpointFailed, e.to_string())
                    }
                },
            },
            EngineEvent::OfferAnswered(target, result) => match (target, result) {
                (NegotiationTarget::Stream(id, epoch), Ok(answer)) => {
                    self.complete_stream(&id, epoch, answer)
                }
                (NegotiationTarget::Stream(id, epoch), Err(e)) => {
                    self.fail_stream(&id, epoch, StreamState::OfferFailed, e.to_string())
                }
                (NegotiationTarget::Sink(id, epoch), Ok(answer)) => {
                    self.connect_sink(&id, epoch, answer)
                }
                (NegotiationTarget::Sink(id, epoch), Err(e)) => {
                    self.fail_sink(&id, epoch, SinkState::OfferFailed, e.to_string())
                }
            },
            EngineEvent::SinkConnected(id, epoch, result) => match result {
                Ok(answer) => self.complete_sink(&id, epoch, answer),
                Err(e) => self.fail_sink(&id, epoch, SinkState::ConnectFailed, e.to_string()),
            },
            EngineEvent::GatherDone(target, result) => {
                if let Err(e) = result {
                    match target {
                        NegotiationTarget::Stream(id, epoch) => {
                            self.fail_stream(&id, epoch, StreamState::GatherFailed, e.to_string())
                        }
                        NegotiationTarget::Sink(id, epoch) => {
                            self.fail_sink(&id, epoch, SinkState::GatherFailed, e.to_string())
                        }
                    }
                }
            }
            EngineEvent::LocalCandidate(target, candidate) => {
                self.forward_local_candidate(target, candidate)
            }
            EngineEvent::CandidateRejected(target, e) => {
                warn!(error = %e, "engine rejected remote candidate");
                match target {
                    NegotiationTarget::Stream(id, epoch) => {
                        let owner = self
                            .streams
                            .get(&id)
                            .filter(|s| s.epoch == epoch)
                            .map(|s| s.owner.clone());
                        if let Some(owner) = owner {
                            self.emit_error(Some(&owner), ResourceKind::Stream, e.to_string());
                        }
                    }
                    NegotiationTarget::Sink(id, epoch) => {
                        let owner = self
                            .sinks
                            .get(&id)
                            .filter(|s| s.epoch == epoch)
                            .map(|s| s.owner.clone());
                        if let Some(owner) = owner {
                            self.emit_error(Some(&owner), ResourceKind::Sink, e.to_string());
                        }
                    }
                }
            }
        }
    }

    fn pipeline_ready(
        &mut self,
        result: Result<Arc<dyn MediaPipeline>, crate::engine::EngineError>,
    ) {
        if self.fsm.get() != RoomState::Creating {
            // Released (or failed) while the engine was working.
            if let Ok(pipeline) = result {
                tokio::spawn(async move { pipeline.release().await });
            }
            return;
        }
        match result {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                if self.fsm.set(RoomState::Ready).is_ok() {
                    info!("media pipeline ready");
                    self.dispatcher.emit(RoomEvent::Ready);
                }
            }
            Err(e) => {
                let _ = self.fsm.set(RoomState::PipelineFailed);
                error!(error = %e, "pipeline creation failed");
                self.emit_error(None, ResourceKind::Room, e.to_string());
            }
        }
    }

    /// Endpoint stage completion: wire candidate forwarding, drain queued
    /// remote candidates in arrival order, then submit the held offer.
    ///
    /// An epoch mismatch means the resource was recreated under the same
    /// id while this endpoint was in flight; the endpoint goes straight
    /// back to the engine instead of grafting onto the new generation.
    fn attach_endpoint(&mut self, target: NegotiationTarget, endpoint: Arc<dyn MediaEndpoint>) {
        let live = match &target {
            NegotiationTarget::Stream(id, epoch) => self
                .streams
                .get(id)
                .map(|s| {
                    s.epoch == *epoch
                        && s.state() == StreamState::Creating
                        && s.endpoint.is_none()
                })
                .unwrap_or(false),
            NegotiationTarget::Sink(id, epoch) => self
                .sinks
                .get(id)
                .map(|s| {
                    s.epoch == *epoch && s.state() == SinkState::Creating && s.endpoint.is_none()
                })
                .unwrap_or(false),
        };
        if !live {
            tokio::spawn(async move { endpoint.release().await });
            return;
        }
        if let NegotiationTarget::Sink(id, epoch) = &target {
            let source_ready = self
                .sinks
                .get(id)
                .and_then(|sink| self.streams.get(&sink.stream))
                .map(|s| s.state() == StreamState::Ready)
                .unwrap_or(false);
            if !source_ready {
                let id = id.clone();
                self.fail_sink(
                    &id,
                    *epoch,
                    SinkState::StreamNotFound,
                    "Stream not found".to_string(),
                );
                tokio::spawn(async move { endpoint.release().await });
                return;
            }
        }
        let tx = self.engine_tx.clone();
        let forward_target = target.clone();
        endpoint.on_candidate(Box::new(move |candidate| {
            let _ = tx.send(EngineEvent::LocalCandidate(forward_target.clone(), candidate));
        }));
        let (queued, offer) = match &target {
            NegotiationTarget::Stream(id, _) => match self.streams.get_mut(id) {
                Some(stream) => {
                    stream.endpoint = Some(Arc::clone(&endpoint));
                    (
                        std::mem::take(&mut stream.candidate_queue),
                        stream.pending_offer.take(),
                    )
                }
                None => return,
            },
            NegotiationTarget::Sink(id, _) => match self.sinks.get_mut(id) {
                Some(sink) => {
                    sink.endpoint = Some(Arc::clone(&endpoint));
                    (
                        std::mem::take(&mut sink.candidate_queue),
                        sink.pending_offer.take(),
                    )
                }
                None => return,
            },
        };
        let Some(offer) = offer else {
            return;
        };
        let tx = self.engine_tx.clone();
        tokio::spawn(async move {
            for candidate in queued {
                if let Err(e) = endpoint.add_ice_candidate(candidate).await {
                    let _ = tx.send(EngineEvent::CandidateRejected(target.clone(), e));
                }
            }
            let result = endpoint.process_offer(&offer).await;
            let _ = tx.send(EngineEvent::OfferAnswered(target, result));
        });
    }

    fn complete_stream(&mut self, id: &StreamId, epoch: u64, answer: String) {
        let Some(stream) = self.streams.get_mut(id) else {
            return;
        };
        if stream.epoch != epoch {
            return;
        }
        if let Err(e) = stream.transition(StreamState::Ready) {
            debug!(stream = %id, error = %e, "ready transition skipped");
            return;
        }
        stream.sdp_answer = Some(answer.clone());
        let owner = stream.owner.clone();
        if let Some(endpoint) = stream.endpoint.clone() {
            let tx = self.engine_tx.clone();
            let target = NegotiationTarget::Stream(id.clone(), epoch);
            tokio::spawn(async move {
                let result = endpoint.gather_candidates().await;
                let _ = tx.send(EngineEvent::GatherDone(target, result));
            });
        }
        info!(participant = %owner, stream = %id, "stream ready");
        if let Some(p) = self.participants.get(&owner) {
            p.dispatcher.emit(ParticipantEvent::StreamCreated {
                id: id.clone(),
                sdp_answer: answer,
            });
        }
        self.dispatcher.emit(RoomEvent::StreamCreated {
            participant_id: owner,
            id: id.clone(),
        });
    }

    /// Offer stage completion for a sink: the source may have been
    /// unpublished meanwhile, so its readiness is checked again before the
    /// media hookup is spawned.
    fn connect_sink(&mut self, id: &SinkId, epoch: u64, answer: String) {
        let Some(sink) = self.sinks.get(id) else {
            return;
        };
        if sink.epoch != epoch {
            return;
        }
        let source_endpoint = match self.streams.get(&sink.stream) {
            Some(s) if s.state() == StreamState::Ready => s.endpoint.clone(),
            _ => None,
        };
        let Some(source_endpoint) = source_endpoint else {
            self.fail_sink(id, epoch, SinkState::StreamNotFound, "Stream not found".to_string());
            return;
        };
        let Some(sink_endpoint) = sink.endpoint.clone() else {
            return;
        };
        let tx = self.engine_tx.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = source_endpoint.connect(sink_endpoint).await.map(|_| answer);
            let _ = tx.send(EngineEvent::SinkConnected(id, epoch, result));
        });
    }

    fn complete_sink(&mut self, id: &SinkId, epoch: u64, answer: String) {
        if self.sinks.get(id).map(|s| s.epoch) != Some(epoch) {
            return;
        }
        let source_ready = self
            .sinks
            .get(id)
            .and_then(|sink| self.streams.get(&sink.stream))
            .map(|s| s.state() == StreamState::Ready)
            .unwrap_or(false);
        if !source_ready {
            self.fail_sink(id, epoch, SinkState::StreamNotFound, "Stream not found".to_string());
            return;
        }
        let Some(sink) = self.sinks.get_mut(id) else {
            return;
        };
        if let Err(e) = sink.transition(SinkState::Ready) {
            debug!(sink = %id, error = %e, "ready transition skipped");
            return;
        }
        sink.sdp_answer = Some(answer.clone());
        let owner = sink.owner.clone();
        let stream_id = sink.stream.clone();
        if let Some(endpoint) = sink.endpoint.clone() {
            let tx = self.engine_tx.clone();
            let target = NegotiationTarget::Sink(id.clone(), epoch);
            tokio::spawn(async move {
                let result = endpoint.gather_candidates().await;
                let _ = tx.send(EngineEvent::GatherDone(target, result));
            });
        }
        info!(participant = %owner, stream = %stream_id, sink = %id, "sink ready");
        if let Some(p) = self.participants.get(&owner) {
            p.dispatcher.emit(ParticipantEvent::SinkCreated {
                stream_id: stream_id.clone(),
                id: id.clone(),
                sdp_answer: answer,
            });
        }
        self.dispatcher.emit(RoomEvent::SinkCreated {
            participant_id: owner,
            stream_id,
            id: id.clone(),
        });
    }

    fn forward_local_candidate(&mut self, target: NegotiationTarget, candidate: IceCandidate) {
        let (owner, kind, id, stream_id) = match &target {
            NegotiationTarget::Stream(sid, epoch) => {
                let Some(stream) = self.streams.get(sid) else {
                    return;
                };
                if stream.epoch != *epoch {
                    return;
                }
                (
                    stream.owner.clone(),
                    ResourceKind::Stream,
                    sid.as_str().to_string(),
                    None,
                )
            }
            NegotiationTarget::Sink(kid, epoch) => {
                let Some(sink) = self.sinks.get(kid) else {
                    return;
                };
                if sink.epoch != *epoch {
                    return;
                }
                (
                    sink.owner.clone(),
                    ResourceKind::Sink,
                    kid.as_str().to_string(),
                    Some(sink.stream.clone()),
                )
            }
        };
        if let Some(p) = self.participants.get(&owner) {
            p.dispatcher.emit(ParticipantEvent::IceCandidate {
                kind,
                id,
                stream_id,
                candidate,
            });
        }
    }

    fn fail_stream(&mut self, id: &StreamId, epoch: u64, state: StreamState, message: String) {
        let Some(stream) = self.streams.get_mut(id) else {
            return;
        };
        if stream.epoch != epoch {
            return;
        }
        let owner = stream.owner.clone();
        if let Err(e) = stream.transition(state) {
            debug!(stream = %id, error = %e, "failure transition skipped");
        }
        warn!(stream = %id, %message, "stream negotiation failed");
        self.emit_error(Some(&owner), ResourceKind::Stream, message);
        self.dispose_stream(id);
    }

    fn fail_sink(&mut self, id: &SinkId, epoch: u64, state: SinkState, message: String) {
        let Some(sink) = self.sinks.get_mut(id) else {
            return;
        };
        if sink.epoch != epoch {
            return;
        }
        let owner = sink.owner.clone();
        if let Err(e) = sink.transition(state) {
            debug!(sink = %id, error = %e, "failure transition skipped");
        }
        warn!(sink = %id, %message, "sink negotiation failed");
        self.emit_error(Some(&owner), ResourceKind::Sink, message);
        self.dispose_sink(id);
    }

    fn emit_error(&self, owner: Option<&ParticipantId>, kind: ResourceKind, message: String) {
        if let Some(id) = owner {
            if let Some(p) = self.participants.get(id) {
                p.dispatcher.emit(ParticipantEvent::Error {
                    message: message.clone(),
                });
            }
        }
        self.dispatcher.emit(RoomEvent::Error {
            participant_id: owner.cloned(),
            kind,
            message,
        });
    }

    /// Disposal cascades leaf-first: a stream takes every sink fed by it
    /// before itself; a participant takes its streams, then its surviving
    /// sinks, then itself.
    fn dispose_participant(&mut self, id: &ParticipantId) {
        let Some(participant) = self.participants.get(id) else {
            return;
        };
        let owned_streams: Vec<StreamId> = participant.streams.iter().cloned().collect();
        let owned_sinks: Vec<SinkId> = participant.sinks_by_stream.values().cloned().collect();
        for stream in &owned_streams {
            self.dispose_stream(stream);
        }
        for sink in &owned_sinks {
            self.dispose_sink(sink);
        }
        if let Some(mut participant) = self.participants.remove(id) {
            participant.mark_disposed();
            participant.dispatcher.emit(ParticipantEvent::Disposed);
        }
        info!(participant = %id, "participant left");
        self.dispatcher
            .emit(RoomEvent::ParticipantDisposed { id: id.clone() });
    }

    fn dispose_stream(&mut self, id: &StreamId) {
        let Some(mut stream) = self.streams.remove(id) else {
            return;
        };
        let dependents: Vec<SinkId> = self
            .sinks
            .values()
            .filter(|s| &s.stream == id)
            .map(|s| s.id.clone())
            .collect();
        for sink in &dependents {
            self.dispose_sink(sink);
        }
        if let Some(owner) = self.participants.get_mut(&stream.owner) {
            owner.streams.remove(id);
        }
        stream.mark_disposed();
        stream.candidate_queue.clear();
        stream.sdp_answer = None;
        if let Some(endpoint) = stream.endpoint.take() {
            tokio::spawn(async move { endpoint.release().await });
        }
        debug!(stream = %id, "stream disposed");
        if let Some(owner) = self.participants.get(&stream.owner) {
            owner
                .dispatcher
                .emit(ParticipantEvent::StreamDisposed { id: id.clone() });
        }
        self.dispatcher.emit(RoomEvent::StreamDisposed {
            participant_id: stream.owner.clone(),
            id: id.clone(),
        });
    }

    fn dispose_sink(&mut self, id: &SinkId) {
        let Some(mut sink) = self.sinks.remove(id) else {
            return;
        };
        if let Some(owner) = self.participants.get_mut(&sink.owner) {
            owner.sinks_by_stream.remove(&sink.stream);
        }
        sink.mark_disposed();
        sink.candidate_queue.clear();
        sink.sdp_answer = None;
        if let Some(endpoint) = sink.endpoint.take() {
            tokio::spawn(async move { endpoint.release().await });
        }
        debug!(sink = %id, "sink disposed");
        if let Some(owner) = self.participants.get(&sink.owner) {
            owner.dispatcher.emit(ParticipantEvent::SinkDisposed {
                stream_id: sink.stream.clone(),
                id: id.clone(),
            });
        }
        self.dispatcher.emit(RoomEvent::SinkDisposed {
            participant_id: sink.owner.clone(),
            stream_id: sink.stream.clone(),
            id: id.clone(),
        });
    }

    fn sweep(&mut self) {
        if self.fsm.get() == RoomState::Ready && self.participants.is_empty() {
            info!("room empty, releasing pipeline");
            self.release_pipeline();
        }
    }
}

/// Maps room events onto protocol broadcasts. Alerts about a participant's
/// own action exclude that participant: its session already learned the
/// outcome from its scoped alert.
fn wire_broadcasts(dispatcher: &Dispatcher<RoomEvent>, alerts: &Arc<dyn AlertSink>) {
    let sink = Arc::clone(alerts);
    dispatcher.on(RoomEventKind::Ready, move |_| {
        sink.broadcast(Alert::Ready, None);
    });
    let sink = Arc::clone(alerts);
    dispatcher.on(RoomEventKind::ParticipantCreated, move |e| {
        if let RoomEvent::ParticipantCreated { id } = e {
            sink.broadcast(
                Alert::ParticipantsJoined {
                    items: vec![ResourceRef::new(ResourceKind::Participant, id.as_str())],
                },
                Some(id),
            );
        }
    });
    // One listener so the order holds: the leaver gets its left alert,
    // everyone else the roster update, and only then is the session's
    // routing dropped.
    let sink = Arc::clone(alerts);
    dispatcher.on(RoomEventKind::ParticipantDisposed, move |e| {
        if let RoomEvent::ParticipantDisposed { id } = e {
            sink.send_to(id, Alert::Left);
            sink.broadcast(
                Alert::ParticipantsLeft {
                    items: vec![ResourceRef::new(ResourceKind::Participant, id.as_str())],
                },
                Some(id),
            );
            sink.released(id);
        }
    });
    let sink = Arc::clone(alerts);
    dispatcher.on(RoomEventKind::StreamCreated, move |e| {
        if let RoomEvent::StreamCreated { participant_id, id } = e {
            sink.broadcast(
                Alert::StreamsCreated {
                    items: vec![ResourceRef::new(ResourceKind::Stream, id.as_str())],
                },
                Some(participant_id),
            );
        }
    });
    let sink = Arc::clone(alerts);
    dispatcher.on(RoomEventKind::StreamDisposed, move |e| {
        if let RoomEvent::StreamDisposed { participant_id, id } = e {
            sink.broadcast(
                Alert::StreamsDestroyed {
                    items: vec![ResourceRef::new(ResourceKind::Stream, id.as_str())],
                },
                Some(participant_id),
            );
        }
    });
    let sink = Arc::clone(alerts);
    dispatcher.on(RoomEventKind::Error, move |e| {
        if let RoomEvent::Error {
            participant_id,
            message,
            ..
        } = e
        {
            sink.broadcast(
                Alert::Error {
                    message: message.clone(),
                },
                participant_id.as_ref(),
            );
        }
    });
}

/// Maps one participant's events onto alerts sent to that session only.
fn wire_session(participant: &Participant, alerts: &Arc<dyn AlertSink>, joined: Alert) {
    let dispatcher = &participant.dispatcher;
    let to = participant.id.clone();

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::Created, move |_| {
        sink.send_to(&id, joined.clone());
    });

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::StreamCreated, move |e| {
        if let ParticipantEvent::StreamCreated {
            id: stream,
            sdp_answer,
        } = e
        {
            sink.send_to(
                &id,
                Alert::Published {
                    id: stream.clone(),
                    sdp_answer: sdp_answer.clone(),
                },
            );
        }
    });

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::StreamDisposed, move |e| {
        if let ParticipantEvent::StreamDisposed { id: stream } = e {
            sink.send_to(&id, Alert::Unpublished { id: stream.clone() });
        }
    });

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::SinkCreated, move |e| {
        if let ParticipantEvent::SinkCreated {
            stream_id,
            id: sink_id,
            sdp_answer,
        } = e
        {
            sink.send_to(
                &id,
                Alert::Subscribed {
                    stream_id: stream_id.clone(),
                    id: sink_id.clone(),
                    sdp_answer: sdp_answer.clone(),
                },
            );
        }
    });

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::SinkDisposed, move |e| {
        if let ParticipantEvent::SinkDisposed {
            stream_id,
            id: sink_id,
        } = e
        {
            sink.send_to(
                &id,
                Alert::Unsubscribed {
                    stream_id: stream_id.clone(),
                    id: sink_id.clone(),
                },
            );
        }
    });

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::IceCandidate, move |e| {
        if let ParticipantEvent::IceCandidate {
            kind,
            id: resource,
            stream_id,
            candidate,
        } = e
        {
            sink.send_to(
                &id,
                Alert::IceCandidate {
                    kind: *kind,
                    id: resource.clone(),
                    stream_id: stream_id.clone(),
                    candidate: candidate.clone(),
                },
            );
        }
    });

    let sink = Arc::clone(alerts);
    let id = to.clone();
    dispatcher.on(ParticipantEventKind::Error, move |e| {
        if let ParticipantEvent::Error { message } = e {
            sink.send_to(
                &id,
                Alert::Error {
                    message: message.clone(),
                },
            );
        }
    });
}
