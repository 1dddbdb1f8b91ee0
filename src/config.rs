//! Hub configuration parsed from environment variables.
//!
//! All settings are optional. Values that fail to parse fall back to their
//! defaults so a typo never prevents the broker from starting.

use std::time::Duration;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 5;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 128;
pub const DEFAULT_HOOK_EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub addr: String,
    /// Read deadline. Refreshed by every pong from the peer.
    pub pong_wait: Duration,
    /// Deadline for a single websocket write.
    pub write_wait: Duration,
    pub outbound_capacity: usize,
    pub hook_event_capacity: usize,
    /// Allow upgrades from any `Origin`.
    pub unsafe_origin: bool,
    /// Session id (`{region}_{uid}`) of an in-memory demo session to attach
    /// at startup.
    pub demo_session: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_owned(),
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            hook_event_capacity: DEFAULT_HOOK_EVENT_CAPACITY,
            unsafe_origin: true,
            demo_session: None,
        }
    }
}

impl HubConfig {
    /// Build config from the process environment.
    ///
    /// - `HOOKHUB_ADDR`: listen address, default `0.0.0.0:8000`
    /// - `HOOKHUB_PONG_WAIT_SECS`: default 60
    /// - `HOOKHUB_WRITE_WAIT_SECS`: default 5
    /// - `HOOKHUB_OUTBOUND_CAPACITY`: default 128
    /// - `HOOKHUB_HOOK_EVENT_CAPACITY`: default 32
    /// - `HOOKHUB_UNSAFE_ORIGIN`: default `true`
    /// - `HOOKHUB_DEMO_SESSION`: unset by default
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_or = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let capacity_or = |key: &str, default: usize| -> usize {
            lookup(key)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(default)
        };

        let pong_wait_secs = parse_or("HOOKHUB_PONG_WAIT_SECS", DEFAULT_PONG_WAIT_SECS).max(1);
        let write_wait_secs = parse_or("HOOKHUB_WRITE_WAIT_SECS", DEFAULT_WRITE_WAIT_SECS).max(1);

        Self {
            addr: lookup("HOOKHUB_ADDR")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ADDR.to_owned()),
            pong_wait: Duration::from_secs(pong_wait_secs),
            write_wait: Duration::from_secs(write_wait_secs),
            outbound_capacity: capacity_or("HOOKHUB_OUTBOUND_CAPACITY", DEFAULT_OUTBOUND_CAPACITY),
            hook_event_capacity: capacity_or("HOOKHUB_HOOK_EVENT_CAPACITY", DEFAULT_HOOK_EVENT_CAPACITY),
            unsafe_origin: lookup("HOOKHUB_UNSAFE_ORIGIN")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            demo_session: lookup("HOOKHUB_DEMO_SESSION").filter(|v| !v.trim().is_empty()),
        }
    }

    /// Keepalive period. Must stay below `pong_wait` so the peer's pong
    /// arrives before the read deadline.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
