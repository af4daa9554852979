//! Session lifecycle controller.
//!
//! Projects [`TerminalClient`] events onto an observable
//! [`ConnectionState`] and owns the reconnect policy. A single supervisor
//! task holds the live client, the endpoint and the retry deadline, so every
//! transition is serialized through one `select!` loop:
//!
//! ```text
//! Disconnected ──connect(ep)──► Connecting ──handshake sent──► Connected
//!      ▲                            ▲  │                           │
//!      │                  retry due │  │ abnormal close / error    │ normal close
//!      │                            │  ▼                           ▼
//!      └──────disconnect()──────── Error ◄──────────────────── Disconnected
//! ```
//!
//! At most one retry deadline exists at a time; `connect`, `reconnect` and
//! `disconnect` clear it before doing anything else. The previous client is
//! fully shut down before a new socket is opened.

// Rust guideline compliant 2026-02

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::client::{ClientEvent, ClientOptions, TerminalClient};
use crate::constants::{CLOSE_ABNORMAL, RECONNECT_DELAY};
use crate::endpoint::SessionEndpoint;
use crate::error::{CloseInfo, ErrorKind, TtyError};
use crate::protocol::TerminalSize;
use crate::transport::Connector;

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none pending.
    #[default]
    Disconnected,
    /// Socket requested, handshake not yet sent.
    Connecting,
    /// Handshake sent; input is relayed.
    Connected,
    /// The last attempt failed. A retry may be scheduled.
    Error(TtyError),
}

impl ConnectionState {
    /// Lower-case name for display and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(e) => write!(f, "error ({e})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Reconnect policy and terminal defaults for a controller.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Delay before retrying after an abnormal close.
    pub reconnect_delay: Duration,
    /// Retry automatically after abnormal closes.
    pub auto_reconnect: bool,
    /// Stay in `Error` instead of retrying when the server rejects the
    /// credential. Off by default: every abnormal close is retried.
    pub stop_on_auth_failure: bool,
    /// Geometry sent in the first handshake.
    pub initial_size: TerminalSize,
    /// Delay between transport open and handshake.
    pub handshake_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            auto_reconnect: true,
            stop_on_auth_failure: false,
            initial_size: TerminalSize::default(),
            handshake_delay: Duration::ZERO,
        }
    }
}

/// Terminal traffic forwarded to the controller's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw terminal output.
    Output(Vec<u8>),
    /// Window title changed.
    Title(String),
    /// Server preferences (informational).
    Preferences(String),
}

#[derive(Debug)]
enum Command {
    Connect(SessionEndpoint),
    Reconnect,
    Disconnect,
    Input(Vec<u8>),
    Resize(u16, u16),
    Pause,
    Resume,
}

/// Handle to a supervised interactive session.
#[derive(Debug)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl SessionController {
    /// Start a controller in the `Disconnected` state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            connector,
            options,
            size: options.initial_size,
            state: state_tx,
            events: event_tx,
            endpoint: None,
            client: None,
            client_events: None,
            last_error: None,
            retry_at: None,
            frozen: false,
        };
        let task = tokio::spawn(supervisor.run(command_rx));

        let controller = Self {
            commands: command_tx,
            state: state_rx,
            task,
        };
        (controller, event_rx)
    }

    /// Connect to `endpoint`, tearing down any current connection first.
    ///
    /// Re-enables automatic reconnects after a [`Self::disconnect`].
    pub fn connect(&self, endpoint: SessionEndpoint) {
        self.command(Command::Connect(endpoint));
    }

    /// Cancel any pending retry and reconnect to the current endpoint now.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Cancel any pending retry, close the connection, and stay disconnected.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Relay raw input bytes.
    ///
    /// Input is not buffered: while the state is anything but `Connected`
    /// it is dropped and the drop is logged at warn level.
    pub fn send_input(&self, data: &[u8]) {
        self.command(Command::Input(data.to_vec()));
    }

    /// Relay typed text.
    pub fn send_text(&self, text: &str) {
        self.send_input(text.as_bytes());
    }

    /// Propagate a terminal geometry change.
    pub fn resize(&self, columns: u16, rows: u16) {
        self.command(Command::Resize(columns, rows));
    }

    /// Ask the server to stop sending output.
    pub fn pause(&self) {
        self.command(Command::Pause);
    }

    /// Ask the server to resume output.
    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch channel of state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`, returning that state.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, TtyError> {
        let mut state = self.subscribe();
        let matched = state
            .wait_for(predicate)
            .await
            .map_err(|e| TtyError::connection_failed(format!("session supervisor stopped: {e}")))?;
        Ok(matched.clone())
    }

    /// Close the connection and stop the supervisor.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            log::warn!("Session supervisor ended abnormally: {e}");
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("Session supervisor has stopped; command ignored");
        }
    }
}

struct Supervisor {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    size: TerminalSize,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    endpoint: Option<SessionEndpoint>,
    client: Option<TerminalClient>,
    client_events: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    last_error: Option<TtyError>,
    retry_at: Option<Instant>,
    frozen: bool,
}

impl Supervisor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = next_event(&mut self.client_events) => {
                    let event = event.unwrap_or_else(|| {
                        ClientEvent::Closed(CloseInfo::new(CLOSE_ABNORMAL, "session relay stopped"))
                    });
                    self.handle_client_event(event);
                }
                () = wait_until(self.retry_at) => {
                    self.retry_at = None;
                    log::info!("Reconnecting terminal session");
                    self.open();
                }
            }
        }

        self.retry_at = None;
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(endpoint) => {
                self.retry_at = None;
                self.teardown().await;
                self.endpoint = Some(endpoint);
                self.frozen = false;
                self.open();
            }
            Command::Reconnect => {
                self.retry_at = None;
                if self.endpoint.is_none() {
                    log::debug!("reconnect() without an endpoint; ignoring");
                    return;
                }
                self.teardown().await;
                self.frozen = false;
                self.open();
            }
            Command::Disconnect => {
                self.retry_at = None;
                self.frozen = true;
                self.teardown().await;
                self.set_state(ConnectionState::Disconnected);
            }
            Command::Input(data) => match &self.client {
                Some(client) => log_send_error(client.send_input(&data)),
                None => log::warn!("Dropping {} input bytes: no terminal session", data.len()),
            },
            Command::Resize(columns, rows) => {
                self.size = TerminalSize::new(columns, rows);
                if let Some(client) = &self.client {
                    log_send_error(client.resize(columns, rows));
                }
            }
            Command::Pause => {
                if let Some(client) = self.client.as_ref().filter(|c| c.is_open()) {
                    log_send_error(client.pause());
                }
            }
            Command::Resume => {
                if let Some(client) = self.client.as_ref().filter(|c| c.is_open()) {
                    log_send_error(client.resume());
                }
            }
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Open => {
                self.last_error = None;
                self.set_state(ConnectionState::Connected);
            }
            ClientEvent::Output(data) => self.forward(SessionEvent::Output(data)),
            ClientEvent::Title(title) => self.forward(SessionEvent::Title(title)),
            ClientEvent::Preferences(prefs) => self.forward(SessionEvent::Preferences(prefs)),
            ClientEvent::Error(e) => {
                self.last_error = Some(e);
            }
            ClientEvent::Closed(info) => {
                self.client = None;
                self.client_events = None;
                let last_error = self.last_error.take();

                if info.is_normal() && last_error.is_none() {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }

                let error = classify_failure(info, last_error);
                self.fail(error);
            }
        }
    }

    fn open(&mut self) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        self.set_state(ConnectionState::Connecting);

        let options = ClientOptions {
            handshake_delay: self.options.handshake_delay,
        };
        match TerminalClient::connect(self.connector.as_ref(), endpoint, self.size, options) {
            Ok((client, events)) => {
                self.client = Some(client);
                self.client_events = Some(events);
            }
            Err(e) => self.fail(e),
        }
    }

    /// Enter `Error` and schedule a retry when the policy allows one.
    fn fail(&mut self, error: TtyError) {
        let rejected = error.kind() == ErrorKind::AuthenticationFailed;
        let retry = self.options.auto_reconnect
            && !self.frozen
            && !(rejected && self.options.stop_on_auth_failure);

        if retry {
            log::warn!(
                "Terminal session lost ({error}); retrying in {:?}",
                self.options.reconnect_delay
            );
            self.retry_at = Some(Instant::now() + self.options.reconnect_delay);
        } else {
            log::warn!("Terminal session failed: {error}");
        }
        self.set_state(ConnectionState::Error(error));
    }

    async fn teardown(&mut self) {
        self.client_events = None;
        self.last_error = None;
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
    }

    fn forward(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        log::debug!("Session state -> {state}");
        self.state.send_replace(state);
    }
}

/// Pick the most specific error for a failed connection.
///
/// A rejected credential wins over whatever else was reported; otherwise the
/// transport error that preceded the close is more telling than the close.
fn classify_failure(info: CloseInfo, last_error: Option<TtyError>) -> TtyError {
    let auth_close = info.classify() == Some(ErrorKind::AuthenticationFailed);
    match last_error {
        Some(e) if e.kind() == ErrorKind::AuthenticationFailed => e,
        Some(_) if auth_close => info.into_error(),
        Some(e) => e,
        None => info.into_error(),
    }
}

fn log_send_error(result: Result<(), TtyError>) {
    if let Err(e) = result {
        log::warn!("Failed to relay to terminal session: {e}");
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<ClientEvent>>) -> Option<ClientEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
