//! WebSocket handler: one connection actor per operator.
//!
//! DESIGN
//! ======
//! On upgrade the connection registers with the hub and runs three pieces:
//! - read pump: socket → normalized request lines → hub
//! - write pump: outbound queue → coalesced text frames → socket, plus the
//!   keepalive ping
//! - hook relay: hook channel → `S_HookEvt` lines → outbound queue
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register with the hub (which replies with `S_UserList`)
//! 2. Whichever pump ends first triggers a single unregister
//! 3. The hub drops its client state, closing the outbound queue and the
//!    hook channel
//! 4. The write pump drains, sends Close and exits; the relay exits
//!
//! Only the write pump touches the sink, so it is the only one that closes
//! the socket.

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::uri::Authority;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, timeout, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use frames::ServerMessage;

use crate::client::{ClientId, Outbox};
use crate::hook::HookEvent;
use crate::hub::HubHandle;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if !state.config.unsafe_origin && !origin_allowed(&headers) {
        let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()).unwrap_or("");
        warn!(origin, "ws: rejected upgrade from foreign origin");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.on_upgrade(move |socket| run_connection(socket, state))
}

/// Same-origin check: a request without `Origin` passes; otherwise the
/// origin's authority (host and port) must equal `Host`, ignoring ASCII case.
pub(crate) fn origin_allowed(headers: &HeaderMap) -> bool {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    origin_authority(origin).is_some_and(|a| a.as_str().eq_ignore_ascii_case(host))
}

/// Authority of an absolute `Origin` value. `null` and scheme-less values
/// have none.
fn origin_authority(origin: &str) -> Option<Authority> {
    let uri: Uri = origin.parse().ok()?;
    uri.scheme()?;
    uri.authority().cloned()
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_connection(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let config = state.config.clone();

    let (out_tx, out_rx) = mpsc::channel::<String>(config.outbound_capacity);
    let (hook_tx, hook_rx) = mpsc::channel::<HookEvent>(config.hook_event_capacity);
    let outbox = Outbox::new(client_id, out_tx);
    let relay_tx = outbox.downgrade();

    // From here on the hub holds the only strong senders.
    if !state.hub.register(outbox, hook_tx) {
        return;
    }
    info!(%client_id, "ws: client connected");

    let (sink, stream) = socket.split();
    let relay = tokio::spawn(relay_hook_events(client_id, hook_rx, relay_tx));
    let mut writer = tokio::spawn(write_pump(client_id, sink, out_rx, config.ping_period(), config.write_wait));

    let writer_done = tokio::select! {
        () = read_pump(client_id, stream, &state.hub, config.pong_wait) => false,
        _ = &mut writer => true,
    };

    state.hub.unregister(client_id);
    if !writer_done {
        let _ = writer.await;
    }
    let _ = relay.await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// PUMPS
// =============================================================================

/// Forward inbound data frames to the hub until the peer goes away or the
/// read deadline passes. Only a pong pushes the deadline out.
async fn read_pump(client_id: ClientId, mut stream: SplitStream<WebSocket>, hub: &HubHandle, pong_wait: Duration) {
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let msg = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!(%client_id, "ws: read deadline expired");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!(%client_id, error = %e, "ws: read failed");
                return;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => hub.message(client_id, frames::normalize(text.as_str())),
            Message::Pong(_) => deadline = Instant::now() + pong_wait,
            Message::Close(_) => return,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => hub.message(client_id, frames::normalize(text)),
                Err(_) => debug!(%client_id, len = bytes.len(), "ws: ignoring non-UTF-8 binary frame"),
            },
            Message::Ping(_) => {}
        }
    }
}

/// Drain the outbound queue onto the socket. Everything already queued when
/// a message is picked up goes out in the same frame, newline-separated.
async fn write_pump(
    client_id: ClientId,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(first) = line else {
                    // Hub dropped the client.
                    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
                    return;
                };
                let mut batch = vec![first];
                while let Ok(next) = rx.try_recv() {
                    batch.push(next);
                }
                let frame = frames::coalesce(&batch);
                if !send_within(client_id, &mut sink, Message::Text(frame.into()), write_wait).await {
                    return;
                }
            }
            _ = ticker.tick() => {
                if !send_within(client_id, &mut sink, Message::Ping(Bytes::new()), write_wait).await {
                    return;
                }
            }
        }
    }
}

async fn send_within(
    client_id: ClientId,
    sink: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    write_wait: Duration,
) -> bool {
    match timeout(write_wait, sink.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(%client_id, error = %e, "ws: write failed");
            false
        }
        Err(_) => {
            warn!(%client_id, "ws: write deadline expired");
            false
        }
    }
}

/// Turn hook events into `S_HookEvt` lines on the outbound queue. Ends when
/// the hub drops the client's hook sender.
async fn relay_hook_events(client_id: ClientId, mut hook_rx: mpsc::Receiver<HookEvent>, out: mpsc::WeakSender<String>) {
    while let Some(event) = hook_rx.recv().await {
        let Some(tx) = out.upgrade() else {
            break;
        };
        Outbox::new(client_id, tx).send(&ServerMessage::HookEvt(event.into()));
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
