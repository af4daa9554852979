//! Terminal session client: one physical connection to a ttyd shell.
//!
//! The client owns the handshake and the byte relay. It never decides
//! whether to reconnect and never throws from inside the relay: everything
//! that happens on the socket becomes a [`ClientEvent`] for the caller
//! (usually [`super::SessionController`] or the execution engine) to
//! interpret.
//!
//! # Sequence
//!
//! ```text
//! connect() ── auth_token() fails fast ──► Err(AUTHENTICATION_FAILED)
//!     │
//!     ▼
//! Connector::open(url, ["tty"])
//!     │ SocketEvent::Open
//!     ▼
//! (handshake_delay) ─► send {"AuthToken", columns, rows} ─► ClientEvent::Open
//!     │ SocketEvent::Message
//!     ▼
//! '0' → Output   '1' → Title   '2' → Preferences   other → logged, ignored
//! ```

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::{CLOSE_GRACE_PERIOD, CLOSE_NORMAL, TTY_SUBPROTOCOL};
use crate::endpoint::SessionEndpoint;
use crate::error::{CloseInfo, TtyError};
use crate::protocol::{ClientFrame, Handshake, ServerFrame, TerminalSize};
use crate::transport::{Connector, ReadyState, Socket, SocketEvent, SocketHandle};

/// Tuning knobs for one connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientOptions {
    /// Wait this long after the transport opens before sending the handshake.
    pub handshake_delay: Duration,
}

/// Something the connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Transport open and handshake sent.
    Open,
    /// Raw terminal output.
    Output(Vec<u8>),
    /// SET_WINDOW_TITLE payload.
    Title(String),
    /// SET_PREFERENCES payload.
    Preferences(String),
    /// Transport error. A `Closed` event follows.
    Error(TtyError),
    /// The connection is gone. Last event.
    Closed(CloseInfo),
}

/// Geometry shared between the handle and the relay.
///
/// The handshake and RESIZE_TERMINAL frames are sent while the lock is held,
/// so every size change is either carried by the handshake or followed by
/// exactly one resize frame.
#[derive(Debug)]
struct Geometry {
    size: TerminalSize,
    handshaken: bool,
}

fn lock(geometry: &Mutex<Geometry>) -> MutexGuard<'_, Geometry> {
    geometry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one live ttyd connection.
///
/// Dropping the client closes the socket with a normal close code.
#[derive(Debug)]
pub struct TerminalClient {
    socket: SocketHandle,
    geometry: Arc<Mutex<Geometry>>,
    task: JoinHandle<()>,
}

impl TerminalClient {
    /// Open a connection to `endpoint`.
    ///
    /// Returns once the socket has been requested; the handshake happens in
    /// the background and is reported as [`ClientEvent::Open`]. Fails
    /// synchronously only when the endpoint's credential is unusable.
    pub fn connect(
        connector: &dyn Connector,
        endpoint: &SessionEndpoint,
        size: TerminalSize,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), TtyError> {
        let auth_token = endpoint.auth_token()?;

        log::info!(
            "Opening terminal session {} ({size})",
            endpoint.redacted_url()
        );
        let socket = connector.open(&endpoint.connection_url(), &[TTY_SUBPROTOCOL]);
        let handle = socket.handle();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let geometry = Arc::new(Mutex::new(Geometry {
            size,
            handshaken: false,
        }));

        let task = tokio::spawn(relay(
            socket,
            auth_token,
            Arc::clone(&geometry),
            options.handshake_delay,
            event_tx,
        ));

        let client = Self {
            socket: handle,
            geometry,
            task,
        };
        Ok((client, event_rx))
    }

    /// True once the handshake went out and the socket has not closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.geometry).handshaken && self.socket.ready_state() == ReadyState::Open
    }

    /// Current terminal geometry.
    #[must_use]
    pub fn size(&self) -> TerminalSize {
        lock(&self.geometry).size
    }

    /// Send raw input bytes as an INPUT frame.
    ///
    /// Input is never queued: before the handshake or after a close it is
    /// dropped and a `WEBSOCKET_ERROR` is returned.
    pub fn send_input(&self, data: &[u8]) -> Result<(), TtyError> {
        if !self.is_open() {
            return Err(TtyError::websocket(format!(
                "session not open, {} input bytes dropped",
                data.len()
            )));
        }
        self.send_frame(&ClientFrame::Input(data.to_vec()))
    }

    /// Send typed text as an INPUT frame.
    pub fn send_text(&self, text: &str) -> Result<(), TtyError> {
        self.send_input(text.as_bytes())
    }

    /// Change the terminal geometry.
    ///
    /// Sends one RESIZE_TERMINAL frame when the size actually changed and
    /// the session is open. Before the handshake the new size is simply
    /// carried by the handshake itself.
    pub fn resize(&self, columns: u16, rows: u16) -> Result<(), TtyError> {
        let new_size = TerminalSize::new(columns, rows);
        let mut geometry = lock(&self.geometry);
        if geometry.size == new_size {
            return Ok(());
        }
        geometry.size = new_size;
        if !geometry.handshaken || self.socket.ready_state() != ReadyState::Open {
            return Ok(());
        }
        self.send_frame(&ClientFrame::Resize { columns, rows })
    }

    /// Ask the server to stop sending output.
    pub fn pause(&self) -> Result<(), TtyError> {
        self.send_frame(&ClientFrame::Pause)
    }

    /// Ask the server to resume output.
    pub fn resume(&self) -> Result<(), TtyError> {
        self.send_frame(&ClientFrame::Resume)
    }

    /// Request a normal close. The `Closed` event follows.
    pub fn close(&self) {
        self.socket.close(CLOSE_NORMAL, "client closed");
    }

    /// Close and wait (bounded) for the relay to observe the close.
    pub async fn shutdown(mut self) {
        self.close();
        if tokio::time::timeout(CLOSE_GRACE_PERIOD, &mut self.task)
            .await
            .is_err()
        {
            log::warn!("Terminal session did not close within {CLOSE_GRACE_PERIOD:?}");
        }
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<(), TtyError> {
        log::debug!("-> {}", frame.name());
        self.socket.send(frame.encode())
    }
}

impl Drop for TerminalClient {
    fn drop(&mut self) {
        self.socket.close(CLOSE_NORMAL, "client dropped");
        self.task.abort();
    }
}

async fn relay(
    mut socket: Socket,
    auth_token: Option<String>,
    geometry: Arc<Mutex<Geometry>>,
    handshake_delay: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let emit = |event: ClientEvent| {
        let _ = events.send(event);
    };

    while let Some(event) = socket.next_event().await {
        match event {
            SocketEvent::Open => {
                if !handshake_delay.is_zero() {
                    tokio::time::sleep(handshake_delay).await;
                }
                if socket.ready_state() != ReadyState::Open {
                    continue;
                }
                let sent = {
                    let mut geometry = lock(&geometry);
                    let handshake = Handshake::new(geometry.size, auth_token.clone());
                    let sent = handshake.to_bytes().and_then(|bytes| socket.send(bytes));
                    geometry.handshaken = sent.is_ok();
                    sent
                };
                match sent {
                    Ok(()) => {
                        log::info!("Terminal session open");
                        emit(ClientEvent::Open);
                    }
                    Err(e) => {
                        log::error!("Handshake failed: {e}");
                        emit(ClientEvent::Error(e));
                        socket.close(CLOSE_NORMAL, "handshake failed");
                    }
                }
            }
            SocketEvent::Message(bytes) => match ServerFrame::parse(&bytes) {
                Some(ServerFrame::Output(data)) => emit(ClientEvent::Output(data)),
                Some(ServerFrame::SetWindowTitle(title)) => emit(ClientEvent::Title(title)),
                Some(ServerFrame::SetPreferences(prefs)) => {
                    emit(ClientEvent::Preferences(prefs));
                }
                Some(ServerFrame::Unknown(code)) => {
                    log::warn!("Ignoring frame with unknown code {:?}", char::from(code));
                }
                None => log::debug!("Ignoring empty frame"),
            },
            SocketEvent::Error(e) => {
                log::warn!("Terminal transport error: {e}");
                emit(ClientEvent::Error(e));
            }
            SocketEvent::Close(info) => {
                lock(&geometry).handshaken = false;
                if info.is_normal() {
                    log::info!("Terminal session closed");
                } else {
                    log::warn!("Terminal session closed abnormally: {} {}", info.code, info.reason);
                }
                emit(ClientEvent::Closed(info));
                return;
            }
        }
    }
}
