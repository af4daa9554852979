//! Duplex socket abstraction.
//!
//! The session client and the execution engine never touch a concrete
//! WebSocket library. They ask a [`Connector`] to open a [`Socket`], send
//! bytes through it and react to the [`SocketEvent`]s it produces. The
//! caller picks the implementation when it builds the connector.
//!
//! # Architecture
//!
//! ```text
//!   Socket (consumer side)            SocketDriver (implementation side)
//!     send(bytes) ───── SocketCommand ────► next_command()
//!     close(code, reason)                    │
//!     next_event() ◄──── SocketEvent ─────── opened() / message() / error() / closed()
//!     ready_state() ◄─── shared ReadyState ─►
//! ```
//!
//! Implementations:
//! - [`crate::ws::WsConnector`]: real network via `tokio-tungstenite`
//! - [`memory::MemoryConnector`]: in-process peer for tests and embedding
//!
//! `open` never fails synchronously. Connection failures arrive as an
//! `Error` event followed by a `Close` event, the same way a browser
//! WebSocket reports them.

// Rust guideline compliant 2026-02

pub mod memory;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{CloseInfo, TtyError};

/// Opens sockets for a particular runtime.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Start opening a socket to `url`, offering the given subprotocols.
    ///
    /// Must be called from within a tokio runtime.
    fn open(&self, url: &str, protocols: &[&str]) -> Socket;
}

/// Connection phase of a socket, comparable across implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Frames may be sent.
    Open = 1,
    /// Close requested, waiting for the transport.
    Closing = 2,
    /// Fully closed.
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The transport is open.
    Open,
    /// One whole message arrived.
    Message(Vec<u8>),
    /// A transport error. A `Close` event follows.
    Error(TtyError),
    /// The socket closed. No further events follow.
    Close(CloseInfo),
}

/// Request from the consumer to the implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Send one message.
    Send(Vec<u8>),
    /// Close the socket.
    Close(CloseInfo),
}

#[derive(Debug, Clone)]
struct SharedReadyState(Arc<AtomicU8>);

impl SharedReadyState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ReadyState::Connecting as u8)))
    }

    fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to` only if still in `from`.
    fn advance(&self, from: ReadyState, to: ReadyState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable sending half of a socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    commands: mpsc::UnboundedSender<SocketCommand>,
    state: SharedReadyState,
}

impl SocketHandle {
    /// Send one message. Fails unless the socket is open.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TtyError> {
        if self.state.get() != ReadyState::Open {
            return Err(TtyError::websocket(format!(
                "cannot send on socket in state {:?}",
                self.state.get()
            )));
        }
        self.commands
            .send(SocketCommand::Send(bytes))
            .map_err(|e| TtyError::websocket(format!("socket driver has shut down: {e}")))
    }

    /// Request a close. A no-op if the socket is already closing or closed.
    pub fn close(&self, code: u16, reason: &str) {
        if matches!(self.state.get(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state.set(ReadyState::Closing);
        let _ = self
            .commands
            .send(SocketCommand::Close(CloseInfo::new(code, reason)));
    }

    /// Current connection phase.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }
}

/// Consumer side of an open (or opening) socket.
#[derive(Debug)]
pub struct Socket {
    handle: SocketHandle,
    events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl Socket {
    /// Create a connected consumer/implementation pair.
    ///
    /// Connector implementations call this and move the driver into the
    /// task that owns the real transport.
    #[must_use]
    pub fn pair() -> (Self, SocketDriver) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = SharedReadyState::new();
        let socket = Self {
            handle: SocketHandle {
                commands: command_tx,
                state: state.clone(),
            },
            events: event_rx,
        };
        let driver = SocketDriver {
            commands: command_rx,
            events: event_tx,
            state,
        };
        (socket, driver)
    }

    /// A cloneable sending handle.
    #[must_use]
    pub fn handle(&self) -> SocketHandle {
        self.handle.clone()
    }

    /// Send one message. Fails unless the socket is open.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TtyError> {
        self.handle.send(bytes)
    }

    /// Request a close.
    pub fn close(&self, code: u16, reason: &str) {
        self.handle.close(code, reason);
    }

    /// Current connection phase.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.handle.ready_state()
    }

    /// Wait for the next event. `None` once the implementation is gone.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }
}

/// Implementation side of a socket.
#[derive(Debug)]
pub struct SocketDriver {
    commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<SocketEvent>,
    state: SharedReadyState,
}

impl SocketDriver {
    /// Report that the transport opened.
    ///
    /// A close requested while connecting stays in effect: the state remains
    /// `Closing` and the queued close command is still delivered.
    pub fn opened(&self) {
        self.state.advance(ReadyState::Connecting, ReadyState::Open);
        self.emit(SocketEvent::Open);
    }

    /// Deliver one received message.
    pub fn message(&self, bytes: Vec<u8>) {
        self.emit(SocketEvent::Message(bytes));
    }

    /// Report a transport error. Callers follow up with [`Self::closed`].
    pub fn error(&self, error: TtyError) {
        self.emit(SocketEvent::Error(error));
    }

    /// Report that the socket closed.
    pub fn closed(&self, info: CloseInfo) {
        self.state.set(ReadyState::Closed);
        self.emit(SocketEvent::Close(info));
    }

    /// Next request from the consumer. `None` once the consumer dropped the socket.
    pub async fn next_command(&mut self) -> Option<SocketCommand> {
        self.commands.recv().await
    }

    /// Current connection phase.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn emit(&self, event: SocketEvent) {
        // The consumer may already be gone; nothing to report to.
        let _ = self.events.send(event);
    }
}
