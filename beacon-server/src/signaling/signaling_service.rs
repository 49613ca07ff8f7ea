use crate::room::RoomHandle;
use crate::signaling::AlertSink;
use beacon_core::{Alert, ParticipantId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

struct Session {
    participant: Option<ParticipantId>,
    tx: mpsc::UnboundedSender<Alert>,
}

struct RegistryInner {
    next_conn: AtomicU64,
    sessions: DashMap<u64, Session>,
    by_participant: DashMap<ParticipantId, u64>,
}

/// Connection table shared between the WebSocket layer and the room's
/// alert output. Constructed before the room so the room can own it as
/// its [`AlertSink`].
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_conn: AtomicU64::new(0),
                sessions: DashMap::new(),
                by_participant: DashMap::new(),
            }),
        }
    }

    pub fn register(&self, tx: mpsc::UnboundedSender<Alert>) -> u64 {
        let conn = self.inner.next_conn.fetch_add(1, Ordering::Relaxed);
        self.inner.sessions.insert(
            conn,
            Session {
                participant: None,
                tx,
            },
        );
        conn
    }

    pub fn unregister(&self, conn: u64) {
        if let Some((_, session)) = self.inner.sessions.remove(&conn) {
            if let Some(participant) = session.participant {
                self.inner.by_participant.remove(&participant);
            }
        }
    }

    /// Associates a joined participant with its connection. Must happen
    /// before the join command is sent: the joined alert and the roster
    /// broadcast are dispatched before the command replies. Refused when
    /// the id already routes to a connection.
    pub fn bind(&self, conn: u64, participant: ParticipantId) -> bool {
        match self.inner.by_participant.entry(participant.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(conn);
                if let Some(mut session) = self.inner.sessions.get_mut(&conn) {
                    session.participant = Some(participant);
                }
                true
            }
        }
    }

    /// Rolls back a binding whose join was rejected. Only this
    /// connection's own binding is dropped.
    pub fn unbind(&self, conn: u64) {
        let participant = self
            .inner
            .sessions
            .get_mut(&conn)
            .and_then(|mut s| s.participant.take());
        if let Some(participant) = participant {
            self.inner
                .by_participant
                .remove_if(&participant, |_, c| *c == conn);
        }
    }

    pub fn participant_of(&self, conn: u64) -> Option<ParticipantId> {
        self.inner
            .sessions
            .get(&conn)
            .and_then(|s| s.participant.clone())
    }

    pub fn connections(&self) -> usize {
        self.inner.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for SessionRegistry {
    fn send_to(&self, to: &ParticipantId, alert: Alert) {
        let Some(conn) = self.inner.by_participant.get(to).map(|c| *c) else {
            warn!(participant = %to, "alert for unknown participant dropped");
            return;
        };
        if let Some(session) = self.inner.sessions.get(&conn) {
            let _ = session.tx.send(alert);
        }
    }

    fn broadcast(&self, alert: Alert, exclude: Option<&ParticipantId>) {
        for session in self.inner.sessions.iter() {
            if let (Some(excluded), Some(participant)) = (exclude, &session.participant) {
                if excluded == participant {
                    continue;
                }
            }
            let _ = session.tx.send(alert.clone());
        }
    }

    fn released(&self, participant: &ParticipantId) {
        if let Some((_, conn)) = self.inner.by_participant.remove(participant) {
            if let Some(mut session) = self.inner.sessions.get_mut(&conn) {
                if session.participant.as_ref() == Some(participant) {
                    session.participant = None;
                }
            }
        }
    }
}

/// Axum state for the signaling endpoint: the shared connection table and
/// the handle into the room loop.
#[derive(Clone)]
pub struct SignalingService {
    registry: SessionRegistry,
    room: RoomHandle,
}

impl SignalingService {
    pub fn new(registry: SessionRegistry, room: RoomHandle) -> Self {
        Self { registry, room }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn room(&self) -> &RoomHandle {
        &self.room
    }
}
