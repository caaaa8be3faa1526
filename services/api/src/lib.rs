//! Colloquy API Library Crate
//!
//! Everything the conversation server needs apart from process startup:
//! configuration, shared state, REST handlers, the WebSocket session protocol
//! and routing. The `api` binary is a thin wrapper around this library.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
