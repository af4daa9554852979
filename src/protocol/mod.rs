//! ttyd wire protocol: frame codec and JSON control payloads.

pub mod frame;
pub mod handshake;

pub use frame::{client_code, decode, encode, server_code, ClientFrame, Frame, ServerFrame};
pub use handshake::{basic_credential, resize_payload, Handshake, TerminalSize};
