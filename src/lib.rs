//! HTTP/WebSocket-tunneled TCP forwarder.
//!
//! A client authenticates, then exchanges encrypted, sequence-numbered
//! chunks with the server over long-poll HTTP or a WebSocket. The server
//! reassembles them in order and relays the byte stream to a backend TCP
//! peer, feeding replies back through the same tunnel.

pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod registry;
pub mod reorder;
pub mod session;
