pub mod capture;
pub mod mock_engine;

pub use capture::*;
pub use mock_engine::*;

use beacon_server::room::{Room, RoomHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::Level;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Room wired to a scripted engine and a capturing alert sink. The sweep
/// interval is long enough to stay out of the way unless a test wants it.
pub fn start_room(
    engine: Arc<MockEngine>,
) -> (RoomHandle, CaptureSink, mpsc::UnboundedReceiver<Delivery>) {
    start_room_with_sweep(engine, Duration::from_secs(3600))
}

pub fn start_room_with_sweep(
    engine: Arc<MockEngine>,
    sweep: Duration,
) -> (RoomHandle, CaptureSink, mpsc::UnboundedReceiver<Delivery>) {
    let (sink, rx) = CaptureSink::new();
    let room = Room::new(engine, Arc::new(sink.clone()), sweep);
    let handle = room.spawn();
    (handle, sink, rx)
}

/// Awaits the next delivery matching `pred`, dropping everything before
/// it. Panics after five seconds so a missing alert fails the test
/// instead of hanging it.
pub async fn wait_delivery(
    rx: &mut mpsc::UnboundedReceiver<Delivery>,
    mut pred: impl FnMut(&Delivery) -> bool,
) -> Delivery {
    timeout(Duration::from_secs(5), async {
        loop {
            let delivery = rx.recv().await.expect("alert channel closed");
            if pred(&delivery) {
                return delivery;
            }
        }
    })
    .await
    .expect("timed out waiting for delivery")
}
