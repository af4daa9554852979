//! Interactive terminal sessions.
//!
//! - [`client`]: one physical connection (handshake, frame relay)
//! - [`lifecycle`]: connection-state machine and reconnect policy on top

pub mod client;
pub mod lifecycle;

pub use client::{ClientEvent, ClientOptions, TerminalClient};
pub use lifecycle::{ConnectionState, SessionController, SessionEvent, SessionOptions};
