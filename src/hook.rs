//! Live subscriptions owned by one client.
//!
//! DESIGN
//! ======
//! A [`Hook`] wraps the session's cancellation capability and cancels it at
//! most once: explicitly via [`Hook::cancel`], or on drop. Dropping a
//! [`HookTable`] therefore tears down every subscription it holds, so no
//! hook outlives the client that owns it.
//!
//! Hook ids come from a per-table counter that only advances when a hook is
//! actually installed. Ids are never reused for the life of the table.

use std::collections::BTreeMap;

use frames::{HookEvt, HookKind};
use serde_json::Value;

use crate::session::Subscription;

pub type HookId = u64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HookError {
    #[error("hook {0} not found")]
    NotFound(HookId),
}

// =============================================================================
// HOOK
// =============================================================================

pub struct Hook {
    kind: HookKind,
    target: String,
    event_only: bool,
    subscription: Option<Box<dyn Subscription>>,
}

impl Hook {
    #[must_use]
    pub fn new(kind: HookKind, target: impl Into<String>, event_only: bool, subscription: Box<dyn Subscription>) -> Self {
        Self { kind, target: target.into(), event_only, subscription: Some(subscription) }
    }

    #[must_use]
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn event_only(&self) -> bool {
        self.event_only
    }

    /// Cancel the underlying subscription. Consumes the hook.
    pub fn cancel(mut self) {
        self.cancel_inner();
    }

    fn cancel_inner(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

impl Drop for Hook {
    fn drop(&mut self) {
        self.cancel_inner();
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("event_only", &self.event_only)
            .field("active", &self.subscription.is_some())
            .finish()
    }
}

// =============================================================================
// HOOK TABLE
// =============================================================================

#[derive(Debug, Default)]
pub struct HookTable {
    next_id: HookId,
    hooks: BTreeMap<HookId, Hook>,
}

impl HookTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an installed hook and return its id.
    pub fn insert(&mut self, hook: Hook) -> HookId {
        let id = self.next_id;
        self.next_id += 1;
        self.hooks.insert(id, hook);
        id
    }

    /// Cancel and remove one hook.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::NotFound`] if `id` is unknown or already removed.
    pub fn remove(&mut self, id: HookId) -> Result<(), HookError> {
        let hook = self.hooks.remove(&id).ok_or(HookError::NotFound(id))?;
        hook.cancel();
        Ok(())
    }

    /// Cancel every hook. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let hooks = std::mem::take(&mut self.hooks);
        let count = hooks.len();
        for hook in hooks.into_values() {
            hook.cancel();
        }
        count
    }

    #[must_use]
    pub fn get(&self, id: HookId) -> Option<&Hook> {
        self.hooks.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = HookId> + '_ {
        self.hooks.keys().copied()
    }
}

// =============================================================================
// HOOK EVENTS
// =============================================================================

/// One firing of a hook, queued on the owning client's hook channel.
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    pub kind: HookKind,
    pub target: String,
    pub data: Option<Value>,
}

impl HookEvent {
    /// Build a packet event. Bytes that parse as JSON are forwarded as that
    /// value; anything else becomes a lossy UTF-8 string.
    #[must_use]
    pub fn packet(target: &str, bytes: &[u8], event_only: bool) -> Self {
        let data = (!event_only).then(|| {
            serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
        });
        Self { kind: HookKind::Packet, target: target.to_owned(), data }
    }

    #[must_use]
    pub fn state(target: &str, payload: Option<Value>, event_only: bool) -> Self {
        Self { kind: HookKind::State, target: target.to_owned(), data: payload.filter(|_| !event_only) }
    }
}

impl From<HookEvent> for HookEvt {
    fn from(event: HookEvent) -> Self {
        Self { kind: event.kind, target: event.target, data: event.data }
    }
}

#[cfg(test)]
#[path = "hook_test.rs"]
mod tests;
