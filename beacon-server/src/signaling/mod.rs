mod alert_sink;
mod signaling_service;
mod ws_handler;

pub use alert_sink::AlertSink;
pub use signaling_service::{SessionRegistry, SignalingService};
pub use ws_handler::ws_handler;
