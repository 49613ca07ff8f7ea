use beacon_core::{Alert, ParticipantId};

/// Outbound seam between the room and whatever carries its alerts.
///
/// The WebSocket layer implements this over live connections; tests plug
/// in capturing fakes. Delivery is fire-and-forget: a missing or gone
/// recipient is not an error the room can act on.
pub trait AlertSink: Send + Sync {
    /// Delivers `alert` to one participant's session.
    fn send_to(&self, to: &ParticipantId, alert: Alert);

    /// Delivers `alert` to every connected session, minus `exclude` when
    /// the alert describes that participant's own action.
    fn broadcast(&self, alert: Alert, exclude: Option<&ParticipantId>);

    /// The participant is fully disposed and its last alert handed over;
    /// routing for the id may be dropped.
    fn released(&self, participant: &ParticipantId) {
        let _ = participant;
    }
}
