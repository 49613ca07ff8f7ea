use crate::model::id::{ParticipantId, SinkId, StreamId};
use crate::model::resource::{IceCandidate, ResourceKind, ResourceRef};
use serde::{Deserialize, Serialize};

/// Client-to-server protocol message requesting a state change.
///
/// Wire form is a flat JSON record tagged by `action`, e.g.
/// `{"action":"publish","id":"...","sdpOffer":"..."}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    Join {
        id: ParticipantId,
    },
    Leave,
    Publish {
        id: StreamId,
        sdp_offer: String,
    },
    Unpublish {
        id: StreamId,
    },
    Subscribe {
        stream_id: StreamId,
        id: SinkId,
        sdp_offer: String,
    },
    Unsubscribe {
        id: SinkId,
    },
    IceCandidate {
        id: String,
        #[serde(rename = "type")]
        kind: ResourceKind,
        candidate: IceCandidate,
    },
}

/// Server-to-client protocol message reporting a state change.
///
/// Tagged by `alert`. `published` and `subscribed` carry the negotiated
/// SDP answer; sink-scoped alerts carry the source `streamId` so clients
/// can route by the `(streamId, sinkId)` pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "alert", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Alert {
    Ready,
    Joined {
        id: ParticipantId,
        participants: Vec<ResourceRef>,
        streams: Vec<ResourceRef>,
    },
    Left,
    ParticipantsJoined {
        items: Vec<ResourceRef>,
    },
    ParticipantsLeft {
        items: Vec<ResourceRef>,
    },
    StreamsCreated {
        items: Vec<ResourceRef>,
    },
    StreamsUpdated {
        items: Vec<ResourceRef>,
    },
    StreamsDestroyed {
        items: Vec<ResourceRef>,
    },
    Published {
        id: StreamId,
        sdp_answer: String,
    },
    Unpublished {
        id: StreamId,
    },
    Subscribed {
        stream_id: StreamId,
        id: SinkId,
        sdp_answer: String,
    },
    Unsubscribed {
        stream_id: StreamId,
        id: SinkId,
    },
    IceCandidate {
        #[serde(rename = "type")]
        kind: ResourceKind,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_id: Option<StreamId>,
        candidate: IceCandidate,
    },
    Error {
        message: String,
    },
}
