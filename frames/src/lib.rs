//! Line-oriented wire protocol shared by the hub and its operator clients.
//!
//! Every logical message is one line: `{OPCODE} {JSON-PAYLOAD}`, the opcode
//! and payload separated by exactly one space. Opcodes that carry nothing
//! omit the payload (and the space). The server may coalesce several pending
//! messages into one websocket frame by joining them with `\n`; receivers
//! split with [`split_batch`].
//!
//! This crate knows nothing about sessions or hooks beyond their wire shape.
//! Payloads stay flexible (`serde_json::Value`) where the hub treats them as
//! opaque.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// OPCODES
// =============================================================================

pub mod opcode {
    pub const C_ATTACH: &str = "C_Attach";
    pub const C_DETACH: &str = "C_Detach";
    pub const C_GET: &str = "C_Get";
    pub const C_HOOK: &str = "C_Hook";
    pub const C_UNHOOK: &str = "C_Unhook";

    pub const S_USER_LIST: &str = "S_UserList";
    pub const S_NEW_USER: &str = "S_NewUser";
    pub const S_ATTACHED: &str = "S_Attached";
    pub const S_DETACHED: &str = "S_Detached";
    pub const S_HOOKED: &str = "S_Hooked";
    pub const S_UNHOOKED: &str = "S_Unhooked";
    pub const S_HOOK_EVT: &str = "S_HookEvt";
    pub const S_GET: &str = "S_Get";
    pub const S_ERROR: &str = "S_Error";
}

use opcode::*;

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned while encoding or decoding a protocol line.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The JSON payload was malformed or had the wrong shape.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    /// The line started with an opcode this codec does not know.
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),
}

// =============================================================================
// FRAMING
// =============================================================================

/// Normalize one inbound websocket frame: embedded line breaks become spaces
/// and surrounding whitespace is trimmed.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.replace("\r\n", " ").replace(['\r', '\n'], " ").trim().to_owned()
}

/// Split a line into opcode and payload at the first space. A line without a
/// space has an empty payload.
#[must_use]
pub fn split_frame(line: &str) -> (&str, &str) {
    line.split_once(' ').unwrap_or((line, ""))
}

/// Decode a JSON payload into `T`.
///
/// # Errors
///
/// Returns [`CodecError::Payload`] when the payload is empty, malformed, or
/// does not match `T`.
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(payload)?)
}

/// Join several encoded messages into one outbound frame.
#[must_use]
pub fn coalesce<S: AsRef<str>>(messages: &[S]) -> String {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(msg.as_ref());
    }
    out
}

/// Split a (possibly coalesced) frame back into its messages.
pub fn split_batch(frame: &str) -> impl Iterator<Item = &str> {
    frame.split('\n').map(str::trim).filter(|line| !line.is_empty())
}

fn join(op: &str, payload: Option<String>) -> String {
    match payload {
        Some(payload) => format!("{op} {payload}"),
        None => op.to_owned(),
    }
}

// =============================================================================
// HOOK KIND
// =============================================================================

/// What a hook subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// Changes to a path in the session's game state.
    #[serde(alias = "gamestate")]
    State,
    /// Network packets addressed to a packet target.
    Packet,
}

impl HookKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Packet => "packet",
        }
    }

    /// Parse a hook kind from its wire name. Accepts `gamestate` as an alias.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "state" | "gamestate" => Some(Self::State),
            "packet" => Some(Self::Packet),
            _ => None,
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CLIENT → SERVER
// =============================================================================

/// Payload of `C_Hook`. The kind stays a string so an unknown kind surfaces
/// as a state error in the hub rather than a decode failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(default)]
    pub event: bool,
}

/// A request sent by an operator client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    Attach(String),
    Detach,
    Get(String),
    Hook(HookRequest),
    /// Hook ids travel as decimal strings.
    Unhook(String),
}

impl ClientMessage {
    /// Encode as a protocol line.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        let (op, payload) = match self {
            Self::Attach(id) => (C_ATTACH, Some(serde_json::to_string(id)?)),
            Self::Detach => (C_DETACH, None),
            Self::Get(path) => (C_GET, Some(serde_json::to_string(path)?)),
            Self::Hook(req) => (C_HOOK, Some(serde_json::to_string(req)?)),
            Self::Unhook(id) => (C_UNHOOK, Some(serde_json::to_string(id)?)),
        };
        Ok(join(op, payload))
    }

    /// Decode a protocol line.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownOpcode`] for opcodes outside the client
    /// set and [`CodecError::Payload`] for malformed payloads.
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let (op, payload) = split_frame(line);
        match op {
            C_ATTACH => Ok(Self::Attach(decode_payload(payload)?)),
            C_DETACH => Ok(Self::Detach),
            C_GET => Ok(Self::Get(decode_payload(payload)?)),
            C_HOOK => Ok(Self::Hook(decode_payload(payload)?)),
            C_UNHOOK => Ok(Self::Unhook(decode_payload(payload)?)),
            other => Err(CodecError::UnknownOpcode(other.to_owned())),
        }
    }
}

// =============================================================================
// SERVER → CLIENT
// =============================================================================

/// Payload of `S_Hooked`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooked {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: HookKind,
    pub target: String,
    pub event: bool,
}

/// Payload of `S_HookEvt`. `data` is absent for event-only hooks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookEvt {
    #[serde(rename = "type")]
    pub kind: HookKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Payload of `S_Get`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub path: String,
    pub data: Value,
}

/// Payload of `S_Error`. `request` echoes the raw request line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub request: String,
    pub error: String,
}

/// A message pushed by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Sent once on connect: every session available to attach to.
    UserList(Vec<String>),
    /// A new session became available.
    NewUser(String),
    Attached(String),
    /// The client was detached, on request or because the session ended.
    Detached,
    Hooked(Hooked),
    Unhooked(String),
    HookEvt(HookEvt),
    Get(GetResult),
    Error(ErrorReport),
}

impl ServerMessage {
    /// Encode as a protocol line.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        let (op, payload) = match self {
            Self::UserList(ids) => (S_USER_LIST, Some(serde_json::to_string(ids)?)),
            Self::NewUser(id) => (S_NEW_USER, Some(serde_json::to_string(id)?)),
            Self::Attached(id) => (S_ATTACHED, Some(serde_json::to_string(id)?)),
            Self::Detached => (S_DETACHED, None),
            Self::Hooked(hooked) => (S_HOOKED, Some(serde_json::to_string(hooked)?)),
            Self::Unhooked(id) => (S_UNHOOKED, Some(serde_json::to_string(id)?)),
            Self::HookEvt(evt) => (S_HOOK_EVT, Some(serde_json::to_string(evt)?)),
            Self::Get(result) => (S_GET, Some(serde_json::to_string(result)?)),
            Self::Error(report) => (S_ERROR, Some(serde_json::to_string(report)?)),
        };
        Ok(join(op, payload))
    }

    /// Decode a single protocol line (not a coalesced batch).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownOpcode`] for opcodes outside the server
    /// set and [`CodecError::Payload`] for malformed payloads.
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let (op, payload) = split_frame(line);
        match op {
            S_USER_LIST => Ok(Self::UserList(decode_payload(payload)?)),
            S_NEW_USER => Ok(Self::NewUser(decode_payload(payload)?)),
            S_ATTACHED => Ok(Self::Attached(decode_payload(payload)?)),
            S_DETACHED => Ok(Self::Detached),
            S_HOOKED => Ok(Self::Hooked(decode_payload(payload)?)),
            S_UNHOOKED => Ok(Self::Unhooked(decode_payload(payload)?)),
            S_HOOK_EVT => Ok(Self::HookEvt(decode_payload(payload)?)),
            S_GET => Ok(Self::Get(decode_payload(payload)?)),
            S_ERROR => Ok(Self::Error(decode_payload(payload)?)),
            other => Err(CodecError::UnknownOpcode(other.to_owned())),
        }
    }

    /// The opcode this message is sent under.
    #[must_use]
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::UserList(_) => S_USER_LIST,
            Self::NewUser(_) => S_NEW_USER,
            Self::Attached(_) => S_ATTACHED,
            Self::Detached => S_DETACHED,
            Self::Hooked(_) => S_HOOKED,
            Self::Unhooked(_) => S_UNHOOKED,
            Self::HookEvt(_) => S_HOOK_EVT,
            Self::Get(_) => S_GET,
            Self::Error(_) => S_ERROR,
        }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
