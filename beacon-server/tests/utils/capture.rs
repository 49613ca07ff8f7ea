use beacon_core::{Alert, ParticipantId};
use beacon_server::AlertSink;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One delivery observed at the alert seam.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    To(ParticipantId, Alert),
    Broadcast(Option<ParticipantId>, Alert),
}

/// AlertSink that records every delivery and forwards it on a channel so
/// tests can await specific alerts.
#[derive(Clone)]
pub struct CaptureSink {
    tx: mpsc::UnboundedSender<Delivery>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl CaptureSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                deliveries: Arc::new(Mutex::new(Vec::new())),
            },
            rx,
        )
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Alerts sent directly to `participant`, in delivery order.
    pub fn sent_to(&self, participant: &ParticipantId) -> Vec<Alert> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|d| match d {
                Delivery::To(to, alert) if to == participant => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<(Option<ParticipantId>, Alert)> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|d| match d {
                Delivery::Broadcast(exclude, alert) => Some((exclude.clone(), alert.clone())),
                _ => None,
            })
            .collect()
    }
}

impl AlertSink for CaptureSink {
    fn send_to(&self, to: &ParticipantId, alert: Alert) {
        let delivery = Delivery::To(to.clone(), alert);
        self.deliveries.lock().unwrap().push(delivery.clone());
        let _ = self.tx.send(delivery);
    }

    fn broadcast(&self, alert: Alert, exclude: Option<&ParticipantId>) {
        let delivery = Delivery::Broadcast(exclude.cloned(), alert);
        self.deliveries.lock().unwrap().push(delivery.clone());
        let _ = self.tx.send(delivery);
    }
}
