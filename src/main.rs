use std::time::Duration;

use hookhub::config::HubConfig;
use hookhub::session::{MemorySession, parse_session_id};
use hookhub::{hub, routes, state};
use serde_json::json;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = HubConfig::from_env();
    let (hub, _hub_task) = hub::spawn();

    if let Some(id) = config.demo_session.as_deref() {
        match parse_session_id(id) {
            Some((region, uid)) => spawn_demo_session(&hub, region, uid),
            None => tracing::warn!(session_id = id, "demo session id must look like REGION_UID, skipping"),
        }
    }

    let addr = config.addr.clone();
    let app = routes::app(state::AppState::new(hub, config));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, "hookhub listening");
    axum::serve(listener, app).await.expect("server failed");
}

/// Attach an in-memory session whose `clock.tick` advances every second, so
/// state hooks can be tried without a live proxy.
fn spawn_demo_session(hub: &hub::HubHandle, region: &str, uid: u64) {
    let session = MemorySession::with_state(
        region,
        uid,
        json!({"user": {"name": "demo", "level": 1}, "clock": {"tick": 0}}),
    );
    hub.session_started(session.clone());
    tracing::info!(region, uid, "demo session attached");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            tick += 1;
            if session.set("clock.tick", json!(tick)).is_err() {
                break;
            }
        }
    });
}
