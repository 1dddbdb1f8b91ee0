//! Hub-side control block for one websocket connection.
//!
//! ARCHITECTURE
//! ============
//! A connection is split across two owners:
//! - The connection task (`routes::ws`) owns the socket halves, the outbound
//!   queue receiver, and the hook channel receiver.
//! - The hub owns a [`ClientState`]: the only strong sender of both queues,
//!   the attachment, and the hook table.
//!
//! Dropping the `ClientState` therefore closes the outbound queue (the
//! writer pump drains and exits), closes the hook channel (the relay exits),
//! and cancels every hook.
//!
//! BACKPRESSURE
//! ============
//! Every enqueue is `try_send`. A full queue drops the newest message and
//! logs a warning; neither the hub nor a proxy callback ever waits on a
//! slow client.

use frames::ServerMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::hook::{HookEvent, HookTable};

pub type ClientId = Uuid;

// =============================================================================
// OUTBOX
// =============================================================================

/// Non-blocking handle onto a client's bounded outbound queue.
#[derive(Clone, Debug)]
pub struct Outbox {
    client_id: ClientId,
    tx: mpsc::Sender<String>,
}

impl Outbox {
    #[must_use]
    pub fn new(client_id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self { client_id, tx }
    }

    /// Encode and enqueue a server message. Returns whether it was queued.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match msg.encode() {
            Ok(line) => enqueue(self.client_id, &self.tx, line),
            Err(e) => {
                warn!(client_id = %self.client_id, opcode = msg.opcode(), error = %e, "ws: failed to encode message");
                false
            }
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> mpsc::WeakSender<String> {
        self.tx.downgrade()
    }
}

/// Enqueue one encoded line, dropping it if the queue is full or closed.
pub fn enqueue(client_id: ClientId, tx: &mpsc::Sender<String>, line: String) -> bool {
    match tx.try_send(line) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%client_id, "ws: outbound queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%client_id, "ws: outbound queue closed, dropping message");
            false
        }
    }
}

// =============================================================================
// HOOK SINK
// =============================================================================

/// Handed to session callbacks. Holds only a weak sender so a callback the
/// session forgets to drop cannot keep the client's hook channel open.
#[derive(Clone, Debug)]
pub struct HookSink {
    client_id: ClientId,
    tx: mpsc::WeakSender<HookEvent>,
}

impl HookSink {
    /// Queue a hook event for the client's relay. Never blocks.
    pub fn push(&self, event: HookEvent) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(client_id = %self.client_id, kind = %event.kind, target = %event.target, "ws: hook channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

// =============================================================================
// CLIENT STATE
// =============================================================================

/// Hub-owned state of one connected client.
#[derive(Debug)]
pub struct ClientState {
    pub(crate) outbox: Outbox,
    hook_tx: mpsc::Sender<HookEvent>,
    /// Session id this client is attached to, if any.
    pub(crate) attached: Option<String>,
    pub(crate) hooks: HookTable,
}

impl ClientState {
    #[must_use]
    pub fn new(outbox: Outbox, hook_tx: mpsc::Sender<HookEvent>) -> Self {
        Self { outbox, hook_tx, attached: None, hooks: HookTable::new() }
    }

    #[must_use]
    pub fn id(&self) -> ClientId {
        self.outbox.client_id
    }

    #[must_use]
    pub fn attached(&self) -> Option<&str> {
        self.attached.as_deref()
    }

    #[must_use]
    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn send(&self, msg: &ServerMessage) -> bool {
        self.outbox.send(msg)
    }

    #[must_use]
    pub fn hook_sink(&self) -> HookSink {
        HookSink { client_id: self.id(), tx: self.hook_tx.downgrade() }
    }

    /// Clear the attachment and cancel every hook. Returns the session id the
    /// client was attached to.
    pub(crate) fn detach(&mut self) -> Option<String> {
        let session_id = self.attached.take()?;
        let cancelled = self.hooks.cancel_all();
        debug!(client_id = %self.id(), %session_id, cancelled, "hub: client hooks cancelled");
        Some(session_id)
    }
}
