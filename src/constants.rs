//! Application-wide constants for sandbox-tty.
//!
//! This module centralizes wire-level tags, protocol defaults and timing
//! constants so the codec, the session client and the execution engine
//! agree on them. Constants are grouped by domain.
//!
//! # Categories
//!
//! - **Wire**: subprotocol tag, close codes, query parameter names
//! - **Marker**: sentinel format used by the execution engine
//! - **Timing**: reconnect, settle and grace delays
//! - **Terminal**: default geometry

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// WebSocket subprotocol negotiated with the ttyd server.
pub const TTY_SUBPROTOCOL: &str = "tty";

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code reported when the stream ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// WebSocket close code for a policy violation.
///
/// ttyd closes with this code when the handshake credential is rejected.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Query parameter carrying the base64 `user:secret` credential.
pub const AUTHORIZATION_QUERY_PARAM: &str = "authorization";

/// Query parameter carrying opaque session arguments (may repeat).
pub const ARG_QUERY_PARAM: &str = "arg";

/// Path segment of the ttyd WebSocket endpoint.
pub const WS_PATH_SEGMENT: &str = "ws";

/// Username paired with the secret when building the basic credential.
pub const DEFAULT_AUTH_USER: &str = "user";

// ============================================================================
// Marker
// ============================================================================

/// Prefix of the end-of-command sentinel echoed after every injected command.
pub const END_MARKER_PREFIX: &str = "___TTYD_EXEC_END___";

/// Suffix closing the sentinel after the exit code.
pub const END_MARKER_SUFFIX: &str = "___";

/// Length of generated marker ids.
pub const MARKER_ID_LEN: usize = 12;

/// Minimum accepted marker id length.
pub const MARKER_ID_MIN_LEN: usize = 8;

/// Exit code reported when a command timed out or its status is unknown.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

// ============================================================================
// Timing
// ============================================================================

/// Delay before a lifecycle controller retries after an abnormal close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Delay after the socket opens before the execution engine starts typing.
///
/// Lets the interactive shell print its banner and prompt first.
pub const SHELL_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default time budget for a one-shot command.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a closing client waits for the transport to confirm the close.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Default interval between attempts of [`crate::poll::poll_until`].
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// Terminal
// ============================================================================

/// Default terminal width in columns.
pub const DEFAULT_COLUMNS: u16 = 80;

/// Default terminal height in rows.
pub const DEFAULT_ROWS: u16 = 24;
