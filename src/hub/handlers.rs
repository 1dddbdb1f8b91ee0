//! Client request handlers, keyed by opcode.
//!
//! Each handler validates its precondition, decodes its payload, mutates hub
//! state, and queues its own success response. Returning `Err` makes the
//! dispatcher answer with `S_Error`.

use std::sync::Arc;

use frames::opcode::{C_ATTACH, C_DETACH, C_GET, C_HOOK, C_UNHOOK};
use frames::{GetResult, HookKind, HookRequest, Hooked, ServerMessage};
use tracing::{info, trace};

use super::{Hub, HubError};
use crate::client::ClientId;
use crate::hook::{Hook, HookEvent, HookId};
use crate::session::{Direction, StateEvent};

pub(super) type Handler = fn(&mut Hub, ClientId, &str) -> Result<(), HubError>;

const HANDLERS: &[(&str, Handler)] = &[
    (C_ATTACH, handle_attach),
    (C_DETACH, handle_detach),
    (C_GET, handle_get),
    (C_HOOK, handle_hook),
    (C_UNHOOK, handle_unhook),
];

pub(super) fn lookup(op: &str) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(name, _)| *name == op)
        .map(|(_, handler)| *handler)
}

// =============================================================================
// ATTACHMENT
// =============================================================================

fn handle_attach(hub: &mut Hub, client_id: ClientId, payload: &str) -> Result<(), HubError> {
    let session_id: String = frames::decode_payload(payload)?;
    let Some(client) = hub.clients.get_mut(&client_id) else {
        return Ok(());
    };

    if let Some(current) = &client.attached {
        return Err(HubError::AlreadyAttached(current.clone()));
    }
    if !hub.sessions.contains_key(&session_id) {
        return Err(HubError::UnknownSession(session_id));
    }

    client.attached = Some(session_id.clone());
    hub.attached.entry(session_id.clone()).or_default().push(client_id);
    info!(%client_id, %session_id, "hub: client attached");

    client.send(&ServerMessage::Attached(session_id));
    Ok(())
}

fn handle_detach(hub: &mut Hub, client_id: ClientId, _payload: &str) -> Result<(), HubError> {
    if hub.detach_client(client_id).is_none() {
        return Err(HubError::NotAttached);
    }
    if let Some(client) = hub.clients.get(&client_id) {
        client.send(&ServerMessage::Detached);
    }
    Ok(())
}

// =============================================================================
// STATE READS
// =============================================================================

fn handle_get(hub: &mut Hub, client_id: ClientId, payload: &str) -> Result<(), HubError> {
    let Some(client) = hub.clients.get(&client_id) else {
        return Ok(());
    };
    let session_id = client.attached().ok_or(HubError::NotAttached)?;
    let path: String = frames::decode_payload(payload)?;
    let session = hub
        .sessions
        .get(session_id)
        .ok_or_else(|| HubError::UnknownSession(session_id.to_owned()))?;

    let data = session.read(&path)?;
    client.send(&ServerMessage::Get(GetResult { path, data }));
    Ok(())
}

// =============================================================================
// HOOKS
// =============================================================================

fn handle_hook(hub: &mut Hub, client_id: ClientId, payload: &str) -> Result<(), HubError> {
    let Some(client) = hub.clients.get_mut(&client_id) else {
        return Ok(());
    };
    let session_id = client.attached.as_deref().ok_or(HubError::NotAttached)?;
    let req: HookRequest = frames::decode_payload(payload)?;
    let kind = HookKind::parse(&req.kind).ok_or_else(|| HubError::UnknownHookKind(req.kind.clone()))?;
    let session = hub
        .sessions
        .get(session_id)
        .ok_or_else(|| HubError::UnknownSession(session_id.to_owned()))?;

    let sink = client.hook_sink();
    let event_only = req.event;
    let subscription = match kind {
        HookKind::State => session.subscribe_state(
            &req.target,
            event_only,
            Arc::new(move |event: StateEvent| {
                sink.push(HookEvent::state(&event.path, event.payload, event_only));
            }),
        )?,
        HookKind::Packet => {
            let target = req.target.clone();
            session.subscribe_packet(
                &req.target,
                Arc::new(move |direction: Direction, bytes: Vec<u8>| -> Vec<u8> {
                    trace!(%target, ?direction, len = bytes.len(), "hub: packet hook fired");
                    sink.push(HookEvent::packet(&target, &bytes, event_only));
                    bytes
                }),
            )?
        }
    };

    let id = client
        .hooks
        .insert(Hook::new(kind, req.target.clone(), event_only, subscription));
    info!(%client_id, hook_id = id, %kind, target = %req.target, event_only, "hub: hook installed");

    client.send(&ServerMessage::Hooked(Hooked { id: id.to_string(), kind, target: req.target, event: event_only }));
    Ok(())
}

fn handle_unhook(hub: &mut Hub, client_id: ClientId, payload: &str) -> Result<(), HubError> {
    let raw: String = frames::decode_payload(payload)?;
    let id = parse_hook_id(&raw).ok_or_else(|| HubError::InvalidHookId(raw.clone()))?;
    let Some(client) = hub.clients.get_mut(&client_id) else {
        return Ok(());
    };

    client.hooks.remove(id)?;
    info!(%client_id, hook_id = id, "hub: hook removed");

    client.send(&ServerMessage::Unhooked(id.to_string()));
    Ok(())
}

/// Accept only the canonical decimal form `S_Hooked` hands out: no sign,
/// whitespace, or leading zeros.
fn parse_hook_id(raw: &str) -> Option<HookId> {
    let canonical = !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && (raw == "0" || !raw.starts_with('0'));
    if !canonical {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
#[path = "handlers_test.rs"]
mod tests;
