//! Sandbox TTY - ttyd-protocol terminal client and command runner.
//!
//! This crate talks to a remote sandbox shell served by ttyd, both
//! interactively (a supervised terminal session with reconnects) and as a
//! request/response primitive (run one command, get output and exit code).
//!
//! # Architecture
//!
//! Leaf-first:
//!
//! - **Protocol** - single-byte-prefixed frames and JSON control payloads
//! - **Transport** - duplex socket trait; WebSocket and in-memory implementations
//! - **Session client** - one connection: handshake, frame relay, resize
//! - **Lifecycle** - observable connection state and reconnect policy
//! - **Exec** - end-marker injection to recover output and exit status
//!
//! # Modules
//!
//! - [`protocol`] - Frame codec, handshake and resize payloads
//! - [`endpoint`] - Connection URL and credentials
//! - [`transport`] - Socket abstraction ([`ws`] is the network implementation)
//! - [`session`] - Terminal client and lifecycle controller
//! - [`exec`] - One-shot command execution
//! - [`poll`] - Retry-until-true helper
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod exec;
pub mod poll;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use config::Config;
pub use endpoint::SessionEndpoint;
pub use error::{CloseInfo, ErrorKind, TtyError};
pub use exec::{execute, execute_checked, CommandExecutor, ExecOptions, ExecOutput};
pub use poll::{poll_until, PollOutcome};
pub use protocol::TerminalSize;
pub use session::{
    ClientEvent, ConnectionState, SessionController, SessionEvent, SessionOptions,
    TerminalClient,
};
pub use transport::Connector;
pub use ws::WsConnector;
