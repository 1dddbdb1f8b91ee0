//! hookhub: realtime broker between a game-traffic interception proxy and
//! operator websocket clients.
//!
//! The interception proxy hands sessions to the hub through
//! [`hub::HubHandle::session_started`]; operators connect over `/ws` and
//! speak the line protocol defined in the `frames` crate.

pub mod client;
pub mod config;
pub mod hook;
pub mod hub;
pub mod routes;
pub mod session;
pub mod state;
