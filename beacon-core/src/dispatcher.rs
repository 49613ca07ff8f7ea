use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A typed event with a cheap discriminant used as the subscription key.
pub trait Event: Clone + Send + 'static {
    type Kind: Copy + Eq + Hash + Send;

    fn kind(&self) -> Self::Kind;
}

type Listener<E> = Box<dyn Fn(&E) + Send + 'static>;
type ListenerMap<E> = HashMap<<E as Event>::Kind, Vec<Listener<E>>>;

/// Per-entity pub/sub registry with deferred delivery.
///
/// `emit` never runs listeners on the caller's stack: events are queued on
/// a per-dispatcher channel and delivered by one spawned task, so listeners
/// of a single dispatcher run in emission order. Nothing orders delivery
/// across different dispatchers. A panicking listener takes the delivery
/// task down with it; the emitter is unaffected.
pub struct Dispatcher<E: Event> {
    listeners: Arc<Mutex<ListenerMap<E>>>,
    queue: mpsc::UnboundedSender<E>,
}

impl<E: Event> Dispatcher<E> {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let listeners: Arc<Mutex<ListenerMap<E>>> = Arc::new(Mutex::new(HashMap::new()));
        let (queue, mut rx) = mpsc::unbounded_channel::<E>();
        let delivery = Arc::clone(&listeners);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Ok(map) = delivery.lock() else { return };
                if let Some(stack) = map.get(&event.kind()) {
                    for listener in stack {
                        listener(&event);
                    }
                }
            }
        });
        Self { listeners, queue }
    }

    /// Appends a listener for `kind`; insertion order is delivery order and
    /// duplicates are allowed.
    pub fn on(&self, kind: E::Kind, listener: impl Fn(&E) + Send + 'static) {
        if let Ok(mut map) = self.listeners.lock() {
            map.entry(kind).or_default().push(Box::new(listener));
        }
    }

    /// Drops every listener registered for `kind`.
    pub fn off(&self, kind: E::Kind) {
        if let Ok(mut map) = self.listeners.lock() {
            map.remove(&kind);
        }
    }

    /// Drops all listeners for all kinds.
    pub fn clear(&self) {
        if let Ok(mut map) = self.listeners.lock() {
            map.clear();
        }
    }

    /// Schedules delivery of `event`; returns immediately.
    pub fn emit(&self, event: E) {
        let _ = self.queue.send(event);
    }
}
