//! The hub: single serialized coordinator of clients, sessions and hooks.
//!
//! ARCHITECTURE
//! ============
//! One task owns every piece of shared bookkeeping:
//! - `clients`: hub-side state of every connected client
//! - `sessions`: every live game session, keyed by `{region}_{uid}`
//! - `attached`: reverse index session id → attached client ids
//!
//! Everything else talks to it through [`HubHandle`], which feeds a single
//! mailbox of [`HubEvent`]s. Events apply one at a time in arrival order,
//! so the maps need no locks and a client's requests are handled in the
//! order its inbound pump read them.
//!
//! INVARIANTS
//! ==========
//! - A client's attachment is `Some(id)` iff the client is listed under `id`
//!   in `attached`.
//! - An unattached client holds no hooks.
//! - Every entry in `sessions` belongs to a session that has not reported
//!   shutdown.
//!
//! ERROR HANDLING
//! ==============
//! Handler errors become `S_Error` frames for the requesting client and are
//! otherwise ignored; nothing a client sends can stop the loop.

mod handlers;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use frames::{CodecError, ErrorReport, ServerMessage};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ClientId, ClientState, Outbox};
use crate::hook::{HookError, HookEvent};
use crate::session::{Session, SessionError};

// =============================================================================
// ERRORS
// =============================================================================

/// Error produced while handling one client request.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Protocol(#[from] CodecError),
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
    #[error("invalid hook id '{0}'")]
    InvalidHookId(String),
    #[error("client is already attached to session '{0}'")]
    AlreadyAttached(String),
    #[error("session '{0}' is not connected")]
    UnknownSession(String),
    #[error("client is not attached")]
    NotAttached,
    #[error("unknown hook type '{0}'")]
    UnknownHookKind(String),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl HubError {
    /// Grepable code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Protocol(_) | Self::InvalidHookId(_) => "E_PROTOCOL",
            Self::UnknownOpcode(_) => "E_UNKNOWN_OPCODE",
            Self::AlreadyAttached(_) => "E_ALREADY_ATTACHED",
            Self::UnknownSession(_) => "E_UNKNOWN_SESSION",
            Self::NotAttached => "E_NOT_ATTACHED",
            Self::UnknownHookKind(_) => "E_UNKNOWN_HOOK_KIND",
            Self::Hook(_) => "E_HOOK_NOT_FOUND",
            Self::Session(_) => "E_SESSION",
        }
    }
}

// =============================================================================
// EVENTS + HANDLE
// =============================================================================

pub enum HubEvent {
    Register { outbox: Outbox, hook_tx: mpsc::Sender<HookEvent> },
    Unregister(ClientId),
    Message { client_id: ClientId, text: String },
    SessionAttach(Arc<dyn Session>),
    /// Carries the reporting instance so a stale shutdown cannot evict a
    /// replacement registered under the same id.
    SessionDetach { id: String, session: Weak<dyn Session> },
    Stats(oneshot::Sender<HubStats>),
}

/// Live counts reported by [`HubHandle::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub clients: usize,
    pub sessions: usize,
}

/// Cloneable entry point into the hub. The loop stops once every handle is
/// dropped.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    fn send(&self, event: HubEvent) -> bool {
        if self.tx.send(event).is_err() {
            warn!("hub: event loop is gone, dropping event");
            return false;
        }
        true
    }

    /// Register a new client. The hub replies with `S_UserList`.
    pub fn register(&self, outbox: Outbox, hook_tx: mpsc::Sender<HookEvent>) -> bool {
        self.send(HubEvent::Register { outbox, hook_tx })
    }

    pub fn unregister(&self, client_id: ClientId) {
        self.send(HubEvent::Unregister(client_id));
    }

    /// Forward one normalized request line from a client.
    pub fn message(&self, client_id: ClientId, text: String) {
        self.send(HubEvent::Message { client_id, text });
    }

    /// Entry point for the interception proxy: a session came up. Registers
    /// the session with the hub and arranges for its shutdown to detach it.
    pub fn session_started(&self, session: Arc<dyn Session>) {
        let id = session.id();
        let instance = Arc::downgrade(&session);
        if !self.send(HubEvent::SessionAttach(session.clone())) {
            return;
        }

        let tx = self.tx.downgrade();
        session.on_shutdown(Box::new(move || {
            let Some(tx) = tx.upgrade() else {
                return;
            };
            let _ = tx.send(HubEvent::SessionDetach { id, session: instance });
        }));
    }

    /// Ask the loop for its live counts. `None` once the loop is gone.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        if !self.send(HubEvent::Stats(reply)) {
            return None;
        }
        rx.await.ok()
    }
}

/// Start the hub loop on the current runtime.
#[must_use]
pub fn spawn() -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(Hub::new().run(rx));
    (HubHandle { tx }, task)
}

// =============================================================================
// HUB
// =============================================================================

#[derive(Default)]
pub struct Hub {
    clients: HashMap<ClientId, ClientState>,
    sessions: HashMap<String, Arc<dyn Session>>,
    attached: HashMap<String, Vec<ClientId>>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the mailbox until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubEvent>) {
        info!("hub: event loop started");
        while let Some(event) = rx.recv().await {
            self.apply(event);
        }
        info!(clients = self.clients.len(), sessions = self.sessions.len(), "hub: event loop stopped");
    }

    /// Apply one event. The only mutator of hub state.
    pub fn apply(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register { outbox, hook_tx } => self.register_client(ClientState::new(outbox, hook_tx)),
            HubEvent::Unregister(client_id) => self.unregister_client(client_id),
            HubEvent::Message { client_id, text } => self.dispatch(client_id, &text),
            HubEvent::SessionAttach(session) => self.attach_session(session),
            HubEvent::SessionDetach { id, session } => self.detach_session(&id, &session),
            HubEvent::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Clients
    // -------------------------------------------------------------------------

    fn register_client(&mut self, client: ClientState) {
        let client_id = client.id();
        client.send(&ServerMessage::UserList(self.session_ids()));
        self.clients.insert(client_id, client);
        info!(%client_id, clients = self.clients.len(), "hub: client registered");
    }

    fn unregister_client(&mut self, client_id: ClientId) {
        self.detach_client(client_id);
        if self.clients.remove(&client_id).is_some() {
            info!(%client_id, clients = self.clients.len(), "hub: client unregistered");
        }
    }

    /// Remove a client from its session's reverse index and cancel its hooks.
    /// No-op for an unattached or unknown client.
    fn detach_client(&mut self, client_id: ClientId) -> Option<String> {
        let session_id = self.clients.get_mut(&client_id)?.detach()?;
        if let Some(list) = self.attached.get_mut(&session_id) {
            list.retain(|id| *id != client_id);
            if list.is_empty() {
                self.attached.remove(&session_id);
            }
        }
        info!(%client_id, %session_id, "hub: client detached");
        Some(session_id)
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    fn attach_session(&mut self, session: Arc<dyn Session>) {
        let session_id = session.id();
        if self.sessions.insert(session_id.clone(), session).is_some() {
            // Hooks installed on the old instance die with it.
            let detached = self.detach_attached_clients(&session_id);
            warn!(%session_id, detached, "hub: session replaced by a new instance");
        }
        info!(%session_id, sessions = self.sessions.len(), "hub: session attached");

        let msg = ServerMessage::NewUser(session_id);
        for client in self.clients.values() {
            client.send(&msg);
        }
    }

    fn detach_session(&mut self, session_id: &str, instance: &Weak<dyn Session>) {
        match self.sessions.get(session_id) {
            Some(current) if Weak::ptr_eq(&Arc::downgrade(current), instance) => {}
            Some(_) => {
                debug!(%session_id, "hub: ignoring shutdown of a replaced session");
                return;
            }
            None => {
                debug!(%session_id, "hub: shutdown for unknown session");
                return;
            }
        }
        self.sessions.remove(session_id);

        let detached = self.detach_attached_clients(session_id);
        info!(%session_id, detached, "hub: session detached");
    }

    /// Clear every attachment to `session_id`, cancel those clients' hooks,
    /// and tell each of them with `S_Detached`. The proxy does not cancel
    /// hooks itself when a session goes away.
    fn detach_attached_clients(&mut self, session_id: &str) -> usize {
        let clients = self.attached.remove(session_id).unwrap_or_default();
        for client_id in &clients {
            if let Some(client) = self.clients.get_mut(client_id) {
                client.detach();
                client.send(&ServerMessage::Detached);
            }
        }
        clients.len()
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    fn dispatch(&mut self, client_id: ClientId, text: &str) {
        if !self.clients.contains_key(&client_id) {
            debug!(%client_id, "hub: message from unregistered client");
            return;
        }
        debug!(%client_id, request = text, "hub: received message");

        let (op, payload) = frames::split_frame(text);
        let result = match handlers::lookup(op) {
            Some(handler) => handler(self, client_id, payload),
            None => Err(HubError::UnknownOpcode(op.to_owned())),
        };

        if let Err(e) = result {
            warn!(%client_id, code = e.error_code(), error = %e, request = text, "hub: request failed");
            if let Some(client) = self.clients.get(&client_id) {
                client.send(&ServerMessage::Error(ErrorReport { request: text.to_owned(), error: e.to_string() }));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats { clients: self.clients.len(), sessions: self.sessions.len() }
    }

    #[must_use]
    pub fn client(&self, client_id: ClientId) -> Option<&ClientState> {
        self.clients.get(&client_id)
    }

    /// Ids of all live sessions, sorted.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Clients attached to `session_id`, in attach order.
    #[must_use]
    pub fn attached_clients(&self, session_id: &str) -> &[ClientId] {
        self.attached.get(session_id).map_or(&[], Vec::as_slice)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
