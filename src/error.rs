//! Error taxonomy shared by the transport, the session client and the
//! execution engine.
//!
//! Every failure is a [`TtyError`] carrying an [`ErrorKind`]. Callers match
//! on the kind; the message is for humans and logs.

use std::fmt;

use thiserror::Error;

use crate::constants::{CLOSE_NORMAL, CLOSE_POLICY_VIOLATION};

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport could not be opened, or closed before a result was produced.
    ConnectionFailed,
    /// The server rejected the credential.
    AuthenticationFailed,
    /// A caller asked for success-or-throw and the command ran out of time.
    Timeout,
    /// Generic transport-layer error without a more specific classification.
    WebsocketError,
    /// A frame violated the expected code/payload shape.
    ProtocolError,
}

impl ErrorKind {
    /// Stable upper-case identifier, e.g. `CONNECTION_FAILED`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::WebsocketError => "WEBSOCKET_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all sandbox-tty operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TtyError {
    kind: ErrorKind,
    message: String,
}

impl TtyError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorKind::ConnectionFailed`].
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    /// Shorthand for [`ErrorKind::AuthenticationFailed`].
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, message)
    }

    /// Shorthand for [`ErrorKind::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for [`ErrorKind::WebsocketError`].
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WebsocketError, message)
    }

    /// Shorthand for [`ErrorKind::ProtocolError`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    /// The failure classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable detail.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if retrying the same endpoint may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionFailed | ErrorKind::WebsocketError
        )
    }
}

/// A transport close as reported by the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason sent by the peer (may be empty).
    pub reason: String,
}

impl CloseInfo {
    /// Create a close record.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Returns true for a normal (code 1000) closure.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }

    /// Classify an abnormal close. Returns `None` for a normal closure.
    #[must_use]
    pub fn classify(&self) -> Option<ErrorKind> {
        if self.is_normal() {
            return None;
        }
        if self.code == CLOSE_POLICY_VIOLATION || mentions_auth(&self.reason) {
            Some(ErrorKind::AuthenticationFailed)
        } else {
            Some(ErrorKind::ConnectionFailed)
        }
    }

    /// Convert into the error a caller waiting for a result should see.
    #[must_use]
    pub fn into_error(self) -> TtyError {
        let kind = self.classify().unwrap_or(ErrorKind::ConnectionFailed);
        TtyError::new(
            kind,
            format!("connection closed (code {}): {}", self.code, self.reason),
        )
    }
}

fn mentions_auth(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    ["auth", "unauthorized", "forbidden", "credential"]
        .iter()
        .any(|needle| reason.contains(needle))
}
