//! In-process transport.
//!
//! [`MemoryConnector`] hands the "server" end of every socket it opens to
//! whoever holds the peer receiver. The peer decides when the socket opens,
//! what it sends and how it closes, which makes the session client and the
//! execution engine testable without a network.
//!
//! ```ignore
//! let (connector, mut peers) = MemoryConnector::new();
//! let socket = connector.open("ws://sandbox/ws", &["tty"]);
//! let mut peer = peers.recv().await.unwrap();
//! peer.accept();
//! peer.send_output(b"$ ");
//! ```

use tokio::sync::mpsc;

use super::{Connector, Socket, SocketCommand, SocketDriver};
use crate::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::error::{CloseInfo, TtyError};
use crate::protocol::{encode, server_code};

/// What the peer asks the socket to do.
#[derive(Debug)]
enum PeerAction {
    Accept,
    Send(Vec<u8>),
    Fail(String),
    Close(CloseInfo),
}

/// What the peer observes from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The client sent one message.
    Frame(Vec<u8>),
    /// The client closed the socket.
    Closed(CloseInfo),
}

/// Server end of an in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    protocols: Vec<String>,
    inbox: mpsc::UnboundedReceiver<PeerEvent>,
    outbox: mpsc::UnboundedSender<PeerAction>,
}

impl MemoryPeer {
    /// URL the client opened.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subprotocols the client offered.
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Complete the opening handshake.
    pub fn accept(&self) {
        let _ = self.outbox.send(PeerAction::Accept);
    }

    /// Send a raw message.
    pub fn send(&self, bytes: Vec<u8>) {
        let _ = self.outbox.send(PeerAction::Send(bytes));
    }

    /// Send an OUTPUT frame.
    pub fn send_output(&self, bytes: &[u8]) {
        self.send(encode(server_code::OUTPUT, bytes));
    }

    /// Fail the connection with a transport error.
    pub fn fail(&self, message: &str) {
        let _ = self.outbox.send(PeerAction::Fail(message.to_string()));
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self
            .outbox
            .send(PeerAction::Close(CloseInfo::new(code, reason)));
    }

    /// Next thing the client did. `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.inbox.recv().await
    }

    /// Next message the client sent, skipping nothing. `None` if the client closed.
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        match self.inbox.recv().await? {
            PeerEvent::Frame(bytes) => Some(bytes),
            PeerEvent::Closed(_) => None,
        }
    }

    /// Non-blocking poll of the next client action.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.inbox.try_recv().ok()
    }
}

/// Connector whose sockets terminate in [`MemoryPeer`]s.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the receiver that yields one peer per `open`.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peers: tx }, rx)
    }
}

impl Connector for MemoryConnector {
    fn open(&self, url: &str, protocols: &[&str]) -> Socket {
        let (socket, driver) = Socket::pair();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            protocols: protocols.iter().map(ToString::to_string).collect(),
            inbox: inbox_rx,
            outbox: outbox_tx,
        };
        if self.peers.send(peer).is_err() {
            log::debug!("memory connector has no peer listener for {url}");
        }

        tokio::spawn(pump(driver, inbox_tx, outbox_rx));
        socket
    }
}

async fn pump(
    mut driver: SocketDriver,
    inbox: mpsc::UnboundedSender<PeerEvent>,
    mut outbox: mpsc::UnboundedReceiver<PeerAction>,
) {
    loop {
        tokio::select! {
            action = outbox.recv() => match action {
                Some(PeerAction::Accept) => driver.opened(),
                Some(PeerAction::Send(bytes)) => driver.message(bytes),
                Some(PeerAction::Fail(message)) => {
                    driver.error(TtyError::connection_failed(message));
                    driver.closed(CloseInfo::new(CLOSE_ABNORMAL, "peer failed"));
                    return;
                }
                Some(PeerAction::Close(info)) => {
                    driver.closed(info);
                    return;
                }
                None => {
                    driver.closed(CloseInfo::new(CLOSE_ABNORMAL, "peer dropped"));
                    return;
                }
            },
            command = driver.next_command() => match command {
                Some(SocketCommand::Send(bytes)) => {
                    let _ = inbox.send(PeerEvent::Frame(bytes));
                }
                Some(SocketCommand::Close(info)) => {
                    let _ = inbox.send(PeerEvent::Closed(info.clone()));
                    driver.closed(info);
                    return;
                }
                None => {
                    let _ = inbox.send(PeerEvent::Closed(CloseInfo::new(CLOSE_NORMAL, "socket dropped")));
                    return;
                }
            },
        }
    }
}
