//! Command execution engine.
//!
//! Turns the interactive ttyd stream into a request/response call. Each
//! call opens its own short-lived [`TerminalClient`], types the command
//! wrapped with a unique end marker, and scans output until the marker
//! (carrying the exit code) comes back.
//!
//! # Flow
//!
//! ```text
//! execute()
//!   ├─ Marker::generate()                       random [A-Za-z0-9]{12}
//!   ├─ TerminalClient::connect(handshake_delay = settle_delay)
//!   ├─ on Open   → INPUT "(cmd); echo \"___TTYD_EXEC_END___<id>:$?___\"\r"
//!   ├─ on Output → ExecJob::push → marker found? resolve
//!   ├─ deadline  → resolve { timed_out: true, exit_code: -1 }
//!   ├─ on Error / Closed before marker → Err(TtyError)
//!   └─ always: client.shutdown()
//! ```
//!
//! Timeouts are results, not errors. Use [`execute_checked`] or
//! [`CommandExecutor::run_checked`] to get a `TIMEOUT` error instead.

// Rust guideline compliant 2026-02

mod job;
pub mod marker;
pub mod sanitize;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

pub use job::ExecOutput;
use job::ExecJob;
use marker::Marker;

use crate::constants::{EXEC_TIMEOUT, SHELL_SETTLE_DELAY};
use crate::endpoint::SessionEndpoint;
use crate::error::{ErrorKind, TtyError};
use crate::protocol::TerminalSize;
use crate::session::{ClientEvent, ClientOptions, TerminalClient};
use crate::transport::Connector;

/// Per-call execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Overall time limit, measured from the call.
    pub timeout: Duration,
    /// Terminal geometry for the handshake.
    pub size: TerminalSize,
    /// Remove ANSI escape sequences from the output.
    pub strip_ansi: bool,
    /// Wait after the socket opens before handshaking, so the shell can settle.
    pub settle_delay: Duration,
    /// Run the command from this directory (inside the subshell).
    pub working_dir: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: EXEC_TIMEOUT,
            size: TerminalSize::default(),
            strip_ansi: true,
            settle_delay: SHELL_SETTLE_DELAY,
            working_dir: None,
        }
    }
}

impl ExecOptions {
    /// Builder-style timeout override.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder-style working directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Run `command` once on a fresh connection to `endpoint`.
///
/// Resolves `Ok` with `timed_out: true` when the time limit elapses first.
/// Fails when the connection cannot be established, the credential is
/// rejected, or the transport drops before the marker arrives.
pub async fn execute(
    connector: &dyn Connector,
    endpoint: &SessionEndpoint,
    command: &str,
    options: &ExecOptions,
) -> Result<ExecOutput, TtyError> {
    let deadline = Instant::now() + options.timeout;
    let marker = Marker::generate()?;
    let command = match &options.working_dir {
        Some(dir) => format!("cd {} && {command}", shell_quote(dir)),
        None => command.to_string(),
    };
    let line = marker.wrap(&command);
    log::debug!(
        "exec [{}] on {}",
        marker.id(),
        endpoint.redacted_url()
    );

    let mut job = ExecJob::new(marker, options.strip_ansi);
    let client_options = ClientOptions {
        handshake_delay: options.settle_delay,
    };
    let (client, mut events) =
        TerminalClient::connect(connector, endpoint, options.size, client_options)?;

    let result = drive(&client, &mut events, &mut job, &line, deadline).await;
    client.shutdown().await;

    match &result {
        Ok(out) if out.timed_out => {
            log::info!("exec [{}] timed out after {:?}", job.marker().id(), out.duration);
        }
        Ok(out) => {
            log::debug!(
                "exec [{}] exited {} in {:?}",
                job.marker().id(),
                out.exit_code,
                out.duration
            );
        }
        Err(e) => log::warn!("exec [{}] failed: {e}", job.marker().id()),
    }
    result
}

/// Like [`execute`], but a timeout is an `Err` of kind `TIMEOUT`.
pub async fn execute_checked(
    connector: &dyn Connector,
    endpoint: &SessionEndpoint,
    command: &str,
    options: &ExecOptions,
) -> Result<ExecOutput, TtyError> {
    let output = execute(connector, endpoint, command, options).await?;
    if output.timed_out {
        return Err(TtyError::timeout(format!(
            "command did not finish within {:?}",
            options.timeout
        )));
    }
    Ok(output)
}

async fn drive(
    client: &TerminalClient,
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    job: &mut ExecJob,
    line: &str,
    deadline: Instant,
) -> Result<ExecOutput, TtyError> {
    let timer = tokio::time::sleep_until(deadline);
    tokio::pin!(timer);
    let mut opened = false;

    loop {
        tokio::select! {
            () = &mut timer => return Ok(job.timed_out()),
            event = events.recv() => match event {
                Some(ClientEvent::Open) => {
                    opened = true;
                    // A socket that closed right after the handshake reports why
                    // through the `Closed` event that follows.
                    if let Err(e) = client.send_text(line) {
                        log::debug!("command not sent: {e}");
                    }
                }
                Some(ClientEvent::Output(data)) => {
                    if let Some(output) = job.push(&data) {
                        return Ok(output);
                    }
                }
                Some(ClientEvent::Title(_) | ClientEvent::Preferences(_)) => {}
                Some(ClientEvent::Error(e)) => {
                    return Err(if opened || e.kind() != ErrorKind::WebsocketError {
                        e
                    } else {
                        TtyError::connection_failed(e.message())
                    });
                }
                Some(ClientEvent::Closed(info)) => return Err(info.into_error()),
                None => {
                    return Err(TtyError::connection_failed(
                        "session ended before the command completed",
                    ));
                }
            },
        }
    }
}

/// Quote `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Reusable execution handle: a connector plus default options.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    connector: Arc<dyn Connector>,
    defaults: ExecOptions,
}

impl CommandExecutor {
    /// Create an executor with the given defaults.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, defaults: ExecOptions) -> Self {
        Self {
            connector,
            defaults,
        }
    }

    /// Default options applied by [`Self::run`].
    #[must_use]
    pub fn defaults(&self) -> &ExecOptions {
        &self.defaults
    }

    /// Run with the default options. Timeout is a result.
    pub async fn run(&self, endpoint: &SessionEndpoint, command: &str) -> Result<ExecOutput, TtyError> {
        self.run_with(endpoint, command, &self.defaults).await
    }

    /// Run with explicit options. Timeout is a result.
    pub async fn run_with(
        &self,
        endpoint: &SessionEndpoint,
        command: &str,
        options: &ExecOptions,
    ) -> Result<ExecOutput, TtyError> {
        execute(self.connector.as_ref(), endpoint, command, options).await
    }

    /// Run with the default options. Timeout is a `TIMEOUT` error.
    pub async fn run_checked(
        &self,
        endpoint: &SessionEndpoint,
        command: &str,
    ) -> Result<ExecOutput, TtyError> {
        execute_checked(self.connector.as_ref(), endpoint, command, &self.defaults).await
    }
}
