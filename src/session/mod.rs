//! Session capability: the hub's view of one live game session.
//!
//! SYSTEM CONTEXT
//! ==============
//! Sessions are owned by the interception proxy. When the proxy identifies a
//! logged-in game connection it hands the hub an `Arc<dyn Session>` through
//! [`crate::hub::HubHandle::session_started`]; when that connection ends the
//! proxy fires the callbacks registered with [`Session::on_shutdown`].
//!
//! Callbacks passed to `subscribe_*` run on the proxy's own threads. They
//! must never block: the hub's callbacks only `try_send` into a per-client
//! channel.

pub mod memory;

use std::sync::Arc;

use serde_json::Value;

pub use memory::MemorySession;

// =============================================================================
// TYPES
// =============================================================================

/// Error surfaced by a session read or subscribe. Displayed verbatim to the
/// operator inside `S_Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("path '{0}' not found")]
    PathNotFound(String),
    #[error("session has shut down")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Which way a packet is travelling through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Game client → game server.
    ToServer,
    /// Game server → game client.
    ToClient,
}

/// A change notification from a state subscription. `payload` is `None` for
/// event-only subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub path: String,
    pub payload: Option<Value>,
}

pub type StateCallback = Arc<dyn Fn(StateEvent) + Send + Sync>;

/// Receives a packet and returns the bytes to pass on, possibly rewritten.
pub type PacketCallback = Arc<dyn Fn(Direction, Vec<u8>) -> Vec<u8> + Send + Sync>;

pub type ShutdownCallback = Box<dyn FnOnce() + Send>;

/// Cancellation capability for one installed subscription.
pub trait Subscription: Send {
    /// Remove the subscription. Calling it again is a no-op.
    fn cancel(&mut self);
}

/// The operations the hub needs from a session.
pub trait Session: Send + Sync {
    fn region(&self) -> &str;

    fn uid(&self) -> u64;

    /// Stable identifier `{region}_{uid}`.
    fn id(&self) -> String {
        session_id(self.region(), self.uid())
    }

    /// Read the current value at a dot-separated state path.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the path does not resolve.
    fn read(&self, path: &str) -> Result<Value, SessionError>;

    /// Subscribe to changes at or below `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the subscription cannot be installed.
    fn subscribe_state(
        &self,
        path: &str,
        event_only: bool,
        on_event: StateCallback,
    ) -> Result<Box<dyn Subscription>, SessionError>;

    /// Subscribe to packets addressed to `target`.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the subscription cannot be installed.
    fn subscribe_packet(
        &self,
        target: &str,
        on_packet: PacketCallback,
    ) -> Result<Box<dyn Subscription>, SessionError>;

    /// Register a callback fired exactly once when the session ends. Fires
    /// immediately if the session has already ended.
    fn on_shutdown(&self, callback: ShutdownCallback);
}

/// Format a session identifier.
#[must_use]
pub fn session_id(region: &str, uid: u64) -> String {
    format!("{region}_{uid}")
}

/// Split a session identifier into region and uid.
#[must_use]
pub fn parse_session_id(id: &str) -> Option<(&str, u64)> {
    let (region, uid) = id.rsplit_once('_')?;
    if region.is_empty() {
        return None;
    }
    Some((region, uid.parse().ok()?))
}
