//! `ocg-protocol` — the gateway's WebSocket wire protocol: frames, handshake,
//! and the RPC method registry.

pub mod frames;
pub mod handshake;
pub mod methods;
