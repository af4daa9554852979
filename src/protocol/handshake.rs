//! JSON control payloads: the opening handshake and resize requests.
//!
//! The handshake is the first message sent after the socket opens. ttyd
//! reads the geometry from it and, when basic-auth gating is on, compares
//! `AuthToken` against the same base64 `user:secret` value carried in the
//! connection URL.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::TtyError;

/// Terminal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    /// Width in columns.
    pub columns: u16,
    /// Height in rows.
    pub rows: u16,
}

impl TerminalSize {
    /// Create a size.
    #[must_use]
    pub const fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(
            crate::constants::DEFAULT_COLUMNS,
            crate::constants::DEFAULT_ROWS,
        )
    }
}

impl std::fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// First client → server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Base64 `user:secret`, present only when the server gates on it.
    #[serde(rename = "AuthToken", skip_serializing_if = "Option::is_none", default)]
    pub auth_token: Option<String>,
    /// Width in columns.
    pub columns: u16,
    /// Height in rows.
    pub rows: u16,
}

impl Handshake {
    /// Build a handshake for the given geometry.
    #[must_use]
    pub fn new(size: TerminalSize, auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            columns: size.columns,
            rows: size.rows,
        }
    }

    /// Serialize to the JSON bytes sent on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TtyError> {
        serde_json::to_vec(self)
            .map_err(|e| TtyError::protocol(format!("handshake serialization failed: {e}")))
    }
}

/// Base64 `user:secret` credential used in both the URL and the handshake.
#[must_use]
pub fn basic_credential(user: &str, secret: &str) -> String {
    BASE64.encode(format!("{user}:{secret}"))
}

/// JSON payload of a RESIZE_TERMINAL frame.
#[must_use]
pub fn resize_payload(columns: u16, rows: u16) -> String {
    serde_json::json!({ "columns": columns, "rows": rows }).to_string()
}
