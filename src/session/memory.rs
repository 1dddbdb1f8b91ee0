//! In-process session backed by a JSON state tree.
//!
//! DESIGN
//! ======
//! Paths are dot-separated: object keys, or decimal indices into arrays. The
//! empty path addresses the whole tree. A write at `a.b` notifies state
//! subscribers on `a.b`, on any ancestor (`a`, ``), and on any descendant
//! (`a.b.c`) since the write may have replaced it.
//!
//! Callbacks are collected under the lock and invoked after it is released,
//! so a callback may call back into the session.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Map, Value};
use tracing::debug;

use super::{
    Direction, PacketCallback, Session, SessionError, ShutdownCallback, StateCallback, StateEvent, Subscription,
};

// =============================================================================
// SESSION
// =============================================================================

pub struct MemorySession {
    region: String,
    uid: u64,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: Value,
    next_sub: u64,
    state_subs: BTreeMap<u64, StateSub>,
    packet_subs: BTreeMap<u64, PacketSub>,
    shutdown: Vec<ShutdownCallback>,
    closed: bool,
}

struct StateSub {
    path: String,
    event_only: bool,
    on_event: StateCallback,
}

struct PacketSub {
    target: String,
    on_packet: PacketCallback,
}

impl MemorySession {
    /// Create a session with an empty object as its state.
    #[must_use]
    pub fn new(region: impl Into<String>, uid: u64) -> Arc<Self> {
        Self::with_state(region, uid, Value::Object(Map::new()))
    }

    #[must_use]
    pub fn with_state(region: impl Into<String>, uid: u64, state: Value) -> Arc<Self> {
        Arc::new(Self {
            region: region.into(),
            uid,
            inner: Arc::new(Mutex::new(Inner {
                state,
                next_sub: 0,
                state_subs: BTreeMap::new(),
                packet_subs: BTreeMap::new(),
                shutdown: Vec::new(),
                closed: false,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `value` at `path`, creating intermediate objects, then notify
    /// affected state subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, [`SessionError::PathNotFound`]
    /// for an out-of-range array index, and [`SessionError::Other`] when the
    /// path runs through a scalar.
    pub fn set(&self, path: &str, value: Value) -> Result<(), SessionError> {
        let notify = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(SessionError::Closed);
            }
            write_path(&mut inner.state, path, value)?;

            inner
                .state_subs
                .values()
                .filter(|sub| affects(&sub.path, path))
                .map(|sub| {
                    let payload = if sub.event_only {
                        None
                    } else {
                        Some(lookup(&inner.state, &sub.path).cloned().unwrap_or(Value::Null))
                    };
                    (sub.on_event.clone(), StateEvent { path: sub.path.clone(), payload })
                })
                .collect::<Vec<_>>()
        };

        for (on_event, event) in notify {
            on_event(event);
        }
        Ok(())
    }

    /// Run a packet through every subscriber on `target`, in subscription
    /// order, and return the bytes to forward.
    pub fn inject_packet(&self, direction: Direction, target: &str, bytes: Vec<u8>) -> Vec<u8> {
        let handlers: Vec<PacketCallback> = {
            let inner = self.lock();
            if inner.closed {
                return bytes;
            }
            inner
                .packet_subs
                .values()
                .filter(|sub| sub.target == target)
                .map(|sub| sub.on_packet.clone())
                .collect()
        };

        handlers
            .into_iter()
            .fold(bytes, |bytes, on_packet| on_packet(direction, bytes))
    }

    /// End the session. Shutdown callbacks fire once; later calls do nothing.
    pub fn shutdown(&self) {
        let callbacks = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.state_subs.clear();
            inner.packet_subs.clear();
            std::mem::take(&mut inner.shutdown)
        };

        debug!(region = %self.region, uid = self.uid, callbacks = callbacks.len(), "session: shutdown");
        for callback in callbacks {
            callback();
        }
    }

    /// Number of live state and packet subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let inner = self.lock();
        inner.state_subs.len() + inner.packet_subs.len()
    }

    fn next_subscription(&self, inner: &mut Inner) -> MemorySubscription {
        let id = inner.next_sub;
        inner.next_sub += 1;
        MemorySubscription { inner: Arc::downgrade(&self.inner), id, active: true }
    }
}

impl Session for MemorySession {
    fn region(&self) -> &str {
        &self.region
    }

    fn uid(&self) -> u64 {
        self.uid
    }

    fn read(&self, path: &str) -> Result<Value, SessionError> {
        let inner = self.lock();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        lookup(&inner.state, path)
            .cloned()
            .ok_or_else(|| SessionError::PathNotFound(path.to_owned()))
    }

    fn subscribe_state(
        &self,
        path: &str,
        event_only: bool,
        on_event: StateCallback,
    ) -> Result<Box<dyn Subscription>, SessionError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        let sub = self.next_subscription(&mut inner);
        inner
            .state_subs
            .insert(sub.id, StateSub { path: path.to_owned(), event_only, on_event });
        Ok(Box::new(sub))
    }

    fn subscribe_packet(
        &self,
        target: &str,
        on_packet: PacketCallback,
    ) -> Result<Box<dyn Subscription>, SessionError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SessionError::Closed);
        }
        let sub = self.next_subscription(&mut inner);
        inner
            .packet_subs
            .insert(sub.id, PacketSub { target: target.to_owned(), on_packet });
        Ok(Box::new(sub))
    }

    fn on_shutdown(&self, callback: ShutdownCallback) {
        let mut inner = self.lock();
        if inner.closed {
            drop(inner);
            callback();
            return;
        }
        inner.shutdown.push(callback);
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

struct MemorySubscription {
    inner: Weak<Mutex<Inner>>,
    id: u64,
    active: bool,
}

impl Subscription for MemorySubscription {
    fn cancel(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.state_subs.remove(&self.id);
        inner.packet_subs.remove(&self.id);
    }
}

// =============================================================================
// PATHS
// =============================================================================

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(root, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn write_path(root: &mut Value, path: &str, value: Value) -> Result<(), SessionError> {
    let mut node = root;
    for seg in segments(path) {
        node = match node {
            Value::Object(map) => map.entry(seg).or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => seg
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .ok_or_else(|| SessionError::PathNotFound(path.to_owned()))?,
            _ => return Err(SessionError::Other(format!("cannot write '{path}' below a scalar"))),
        };
    }
    *node = value;
    Ok(())
}

/// Whether a write at `changed` is visible to a subscriber on `subscribed`.
fn affects(subscribed: &str, changed: &str) -> bool {
    let sub: Vec<&str> = segments(subscribed).collect();
    let chg: Vec<&str> = segments(changed).collect();
    let common = sub.len().min(chg.len());
    sub[..common] == chg[..common]
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
