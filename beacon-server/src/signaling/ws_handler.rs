use crate::room::{PipelineStatus, RoomError};
use crate::signaling::SignalingService;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use beacon_core::{Action, Alert, ParticipantId};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<SignalingService>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, service))
}

async fn handle_socket(socket: WebSocket, service: SignalingService) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Alert>();

    let conn = service.registry().register(tx.clone());
    info!(conn, "new signaling connection");

    let mut send_task = tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            match serde_json::to_string(&alert) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(conn, "failed to serialize alert: {e}"),
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let service = service.clone();
        async move { run_session(conn, tx, receiver, service).await }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    // A vanished session takes its participant with it.
    if let Some(participant) = service.registry().participant_of(conn) {
        service.room().disconnect(participant).await;
    }
    service.registry().unregister(conn);
    info!(conn, "signaling connection closed");
}

async fn run_session(
    conn: u64,
    tx: mpsc::UnboundedSender<Alert>,
    mut receiver: SplitStream<WebSocket>,
    service: SignalingService,
) {
    match service.room().ensure_pipeline().await {
        Ok(PipelineStatus::Ready) => {
            let _ = tx.send(Alert::Ready);
        }
        // The ready broadcast reaches this connection once the pipeline
        // comes up.
        Ok(PipelineStatus::Creating) => {}
        Ok(PipelineStatus::Failed) | Err(_) => {
            let _ = tx.send(Alert::Error {
                message: "Room not ready".to_string(),
            });
        }
    }

    let mut joined: Option<ParticipantId> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<Action>(&text) {
                Ok(action) => apply_action(action, &mut joined, conn, &tx, &service).await,
                Err(e) => {
                    warn!(conn, "malformed action: {e}");
                    let _ = tx.send(Alert::Error {
                        message: "Malformed message".to_string(),
                    });
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// One admission rule lives here rather than in the room: a session holds
/// at most one participant, so joining twice or acting before joining is
/// answered without a round-trip.
async fn apply_action(
    action: Action,
    joined: &mut Option<ParticipantId>,
    conn: u64,
    tx: &mpsc::UnboundedSender<Alert>,
    service: &SignalingService,
) {
    let reject = |message: String| {
        let _ = tx.send(Alert::Error { message });
    };

    match action {
        Action::Join { id } => {
            if joined.is_some() {
                reject("Participant already joined".to_string());
                return;
            }
            // Bind before the command goes out: the joined alert and the
            // roster broadcast are dispatched before the reply resolves.
            if !service.registry().bind(conn, id.clone()) {
                reject(RoomError::ParticipantExists.to_string());
                return;
            }
            match service.room().join(id.clone()).await {
                Ok(()) => *joined = Some(id),
                Err(e) => {
                    service.registry().unbind(conn);
                    reject(e.to_string());
                }
            }
        }
        Action::Leave => {
            let Some(id) = joined.clone() else {
                reject("Participant not joined".to_string());
                return;
            };
            // The disposal flow drops the binding itself, after the left
            // alert is on its way.
            match service.room().leave(id).await {
                Ok(()) => *joined = None,
                Err(e) => reject(e.to_string()),
            }
        }
        Action::Publish { id, sdp_offer } => {
            let Some(participant) = joined.clone() else {
                reject("Participant not joined".to_string());
                return;
            };
            if let Err(e) = service.room().publish(participant, id, sdp_offer).await {
                reject(e.to_string());
            }
        }
        Action::Unpublish { id } => {
            let Some(participant) = joined.clone() else {
                reject("Participant not joined".to_string());
                return;
            };
            if let Err(e) = service.room().unpublish(participant, id).await {
                reject(e.to_string());
            }
        }
        Action::Subscribe {
            stream_id,
            id,
            sdp_offer,
        } => {
            let Some(participant) = joined.clone() else {
                reject("Participant not joined".to_string());
                return;
            };
            if let Err(e) = service
                .room()
                .subscribe(participant, stream_id, id, sdp_offer)
                .await
            {
                reject(e.to_string());
            }
        }
        Action::Unsubscribe { id } => {
            let Some(participant) = joined.clone() else {
                reject("Participant not joined".to_string());
                return;
            };
            if let Err(e) = service.room().unsubscribe(participant, id).await {
                reject(e.to_string());
            }
        }
        Action::IceCandidate {
            id,
            kind,
            candidate,
        } => {
            let Some(participant) = joined.clone() else {
                reject("Participant not joined".to_string());
                return;
            };
            if let Err(e) = service
                .room()
                .ice_candidate(participant, id, kind, candidate)
                .await
            {
                reject(e.to_string());
            }
        }
    }
}
