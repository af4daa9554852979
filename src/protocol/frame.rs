//! Wire codec for ttyd frames.
//!
//! Every WebSocket message is exactly one frame: a single ASCII command byte
//! followed by the payload.
//!
//! ```text
//! [u8 code] [payload: remaining bytes]
//! ```
//!
//! There is no length prefix and no checksum; the WebSocket layer already
//! delivers whole messages, so no reassembly is needed.
//!
//! Client → server codes:
//! - `'0'`: INPUT (raw bytes typed or injected)
//! - `'1'`: RESIZE_TERMINAL (JSON `{columns, rows}`)
//! - `'2'`: PAUSE
//! - `'3'`: RESUME
//!
//! Server → client codes:
//! - `'0'`: OUTPUT (raw terminal bytes)
//! - `'1'`: SET_WINDOW_TITLE (UTF-8 string)
//! - `'2'`: SET_PREFERENCES (UTF-8 string, informational)

/// Client → server command bytes.
pub mod client_code {
    /// Raw input bytes.
    pub const INPUT: u8 = b'0';
    /// Terminal geometry change.
    pub const RESIZE_TERMINAL: u8 = b'1';
    /// Ask the server to stop sending output.
    pub const PAUSE: u8 = b'2';
    /// Ask the server to resume sending output.
    pub const RESUME: u8 = b'3';
}

/// Server → client command bytes.
pub mod server_code {
    /// Raw terminal output.
    pub const OUTPUT: u8 = b'0';
    /// Window title string.
    pub const SET_WINDOW_TITLE: u8 = b'1';
    /// Client preferences (JSON string).
    pub const SET_PREFERENCES: u8 = b'2';
}

/// A decoded frame borrowing its payload from the received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Command byte.
    pub code: u8,
    /// Everything after the command byte.
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Payload as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(self.payload).into_owned()
    }
}

/// Encode a frame: the code byte followed by the payload.
#[must_use]
pub fn encode(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(code);
    buf.extend_from_slice(payload);
    buf
}

/// Decode a received message.
///
/// Returns `None` for a zero-length message, which callers treat as a no-op.
#[must_use]
pub fn decode(message: &[u8]) -> Option<Frame<'_>> {
    let (&code, payload) = message.split_first()?;
    Some(Frame { code, payload })
}

/// A frame the server sent, classified by code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Terminal output bytes.
    Output(Vec<u8>),
    /// New window title.
    SetWindowTitle(String),
    /// Preferences string (informational only).
    SetPreferences(String),
    /// A code this client does not know. Logged and ignored by callers.
    Unknown(u8),
}

impl ServerFrame {
    /// Classify a received message. `None` for an empty message.
    #[must_use]
    pub fn parse(message: &[u8]) -> Option<Self> {
        let frame = decode(message)?;
        Some(match frame.code {
            server_code::OUTPUT => Self::Output(frame.payload.to_vec()),
            server_code::SET_WINDOW_TITLE => Self::SetWindowTitle(frame.payload_lossy()),
            server_code::SET_PREFERENCES => Self::SetPreferences(frame.payload_lossy()),
            other => Self::Unknown(other),
        })
    }
}

/// A frame the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Raw input bytes.
    Input(Vec<u8>),
    /// Resize to the given geometry.
    Resize {
        /// Width in columns.
        columns: u16,
        /// Height in rows.
        rows: u16,
    },
    /// Flow control: stop output.
    Pause,
    /// Flow control: resume output.
    Resume,
}

impl ClientFrame {
    /// Encode this frame into wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Input(data) => encode(client_code::INPUT, data),
            Self::Resize { columns, rows } => {
                let payload = super::handshake::resize_payload(*columns, *rows);
                encode(client_code::RESIZE_TERMINAL, payload.as_bytes())
            }
            Self::Pause => encode(client_code::PAUSE, &[]),
            Self::Resume => encode(client_code::RESUME, &[]),
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Input(_) => "INPUT",
            Self::Resize { .. } => "RESIZE_TERMINAL",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
        }
    }
}
