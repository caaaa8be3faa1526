//! WebSocket Conversation Sessions
//!
//! The full-duplex `/v1/conversation` endpoint. It is split into:
//!
//! - `protocol`: the JSON control messages exchanged with the client.
//! - `session`: the connection lifecycle, from handshake to close.
//! - `turn`: one conversational turn, from user input to spoken reply.

pub mod protocol;
pub mod session;
mod turn;

pub use session::ws_handler;
