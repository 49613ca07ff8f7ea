use crate::room::command::{PipelineStatus, RoomCommand, RoomSnapshot};
use crate::room::error::RoomError;
use beacon_core::{IceCandidate, ParticipantId, ResourceKind, SinkId, StreamId};
use tokio::sync::{mpsc, oneshot};

/// Clonable handle through which sessions drive the room loop.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn new(tx: mpsc::Sender<RoomCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        command: RoomCommand,
        reply: oneshot::Receiver<Result<T, RoomError>>,
    ) -> Result<T, RoomError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        reply.await.map_err(|_| RoomError::RoomClosed)?
    }

    pub async fn ensure_pipeline(&self) -> Result<PipelineStatus, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::EnsurePipeline { reply: tx }, rx).await
    }

    pub async fn release_pipeline(&self) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::ReleasePipeline { reply: tx }, rx).await
    }

    pub async fn join(&self, id: ParticipantId) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::Join { id, reply: tx }, rx).await
    }

    pub async fn leave(&self, id: ParticipantId) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(RoomCommand::Leave { id, reply: tx }, rx).await
    }

    pub async fn disconnect(&self, id: ParticipantId) {
        let _ = self.tx.send(RoomCommand::Disconnect { id }).await;
    }

    pub async fn publish(
        &self,
        participant: ParticipantId,
        stream: StreamId,
        sdp_offer: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Publish {
                participant,
                stream,
                sdp_offer,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn unpublish(
        &self,
        participant: ParticipantId,
        stream: StreamId,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Unpublish {
                participant,
                stream,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn subscribe(
        &self,
        participant: ParticipantId,
        stream: StreamId,
        sink: SinkId,
        sdp_offer: String,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Subscribe {
                participant,
                stream,
                sink,
                sdp_offer,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn unsubscribe(
        &self,
        participant: ParticipantId,
        sink: SinkId,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Unsubscribe {
                participant,
                sink,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn ice_candidate(
        &self,
        participant: ParticipantId,
        resource: String,
        kind: ResourceKind,
        candidate: IceCandidate,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            RoomCommand::Candidate {
                participant,
                resource,
                kind,
                candidate,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Snapshot { reply: tx })
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        rx.await.map_err(|_| RoomError::RoomClosed)
    }
}
