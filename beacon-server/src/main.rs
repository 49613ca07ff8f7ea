use anyhow::Context;
use axum::Router;
use axum::routing::get;
use beacon_server::room::{Room, RoomEventKind};
use beacon_server::signaling::{SessionRegistry, SignalingService, ws_handler};
use beacon_server::{LoopbackEngine, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env();
    info!(host = %config.host, port = config.port, "starting signaling server");

    let registry = SessionRegistry::new();
    let room = Room::new(
        Arc::new(LoopbackEngine::new()),
        Arc::new(registry.clone()),
        Duration::from_millis(config.sweep_interval_ms),
    );
    room.on(RoomEventKind::Error, |event| {
        tracing::warn!(?event, "room error");
    });
    let handle = room.spawn();

    let service = SignalingService::new(registry, handle);
    let app = Router::new().route("/", get(ws_handler)).with_state(service);

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    info!("listening on ws://{}", config.bind_addr());
    axum::serve(listener, app).await.context("server stopped")?;
    Ok(())
}
