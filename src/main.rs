//! sandbox-tty CLI - run commands in, or attach to, a ttyd sandbox shell.
//!
//! This is the main binary entry point. See the `sandbox_tty` library for
//! the protocol client and execution engine.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, SetTitle};
use sandbox_tty::constants::POLL_INTERVAL;
use sandbox_tty::{
    poll_until, CommandExecutor, Config, ConnectionState, ErrorKind, PollOutcome,
    SessionController, SessionEndpoint, SessionEvent, WsConnector,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Exit status used when a command runs out of time (matches coreutils `timeout`).
const EXIT_TIMEOUT: i32 = 124;

/// Byte sent by Ctrl-] which detaches an interactive session.
const DETACH_KEY: u8 = 0x1d;

/// How often `attach` checks the local terminal size.
const RESIZE_POLL: Duration = Duration::from_millis(250);

// CLI
#[derive(Parser)]
#[command(name = "sandbox-tty")]
#[command(version)]
#[command(about = "ttyd terminal client and one-shot command runner for remote sandboxes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command and exit with its exit code
    Exec {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Time limit in milliseconds (default from config)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Keep ANSI escape sequences in the output
        #[arg(long)]
        keep_ansi: bool,
        /// Run from this directory
        #[arg(long)]
        cwd: Option<String>,
        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Attach the local terminal to the remote shell (Ctrl-] detaches)
    Attach {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
    /// Re-run a command until it exits 0 or attempts run out
    Wait {
        #[command(flatten)]
        endpoint: EndpointArgs,
        /// Maximum number of attempts
        #[arg(long, default_value_t = 30)]
        attempts: u32,
        /// Delay between attempts in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Command to probe with
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Print the effective configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[derive(Args, Debug)]
struct EndpointArgs {
    /// ttyd URL (http(s) or ws(s); "/ws" is appended when missing)
    #[arg(long)]
    url: String,
    /// Basic-auth user (default from config)
    #[arg(long)]
    user: Option<String>,
    /// Basic-auth secret
    #[arg(long)]
    secret: Option<String>,
    /// Extra opaque `arg` token, repeatable
    #[arg(long = "arg")]
    args: Vec<String>,
    /// Opaque session id tag
    #[arg(long)]
    session_id: Option<String>,
    /// Terminal width (default from config)
    #[arg(long)]
    cols: Option<u16>,
    /// Terminal height (default from config)
    #[arg(long)]
    rows: Option<u16>,
}

impl EndpointArgs {
    fn build(&self, config: &Config) -> Result<SessionEndpoint> {
        let mut endpoint = SessionEndpoint::from_base(&self.url)
            .with_context(|| format!("Invalid --url {}", self.url))?;
        for token in &self.args {
            endpoint = endpoint.with_arg(token);
        }
        if let Some(secret) = &self.secret {
            let user = self.user.as_deref().unwrap_or(&config.auth_user);
            endpoint = endpoint.with_credentials(user, secret.as_str());
        }
        if let Some(session_id) = &self.session_id {
            endpoint = endpoint.with_session_id(session_id.as_str());
        }
        Ok(endpoint)
    }

    fn apply_size(&self, config: &mut Config) {
        if let Some(cols) = self.cols {
            config.columns = cols;
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
    }
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.format_timestamp_secs();

    // Attach mode owns the terminal, so logs can be sent to a file instead
    if let Ok(path) = std::env::var("SANDBOX_TTY_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

async fn run_exec(
    mut config: Config,
    endpoint: EndpointArgs,
    timeout_ms: Option<u64>,
    keep_ansi: bool,
    cwd: Option<String>,
    command: &[String],
) -> Result<i32> {
    endpoint.apply_size(&mut config);
    let target = endpoint.build(&config)?;

    let mut options = config.exec_options();
    if let Some(ms) = timeout_ms {
        options.timeout = Duration::from_millis(ms);
    }
    options.strip_ansi = !keep_ansi;
    options.working_dir = cwd;

    let executor = CommandExecutor::new(Arc::new(WsConnector::new()), options);
    let output = executor.run(&target, &command.join(" ")).await?;

    if !output.output.is_empty() {
        println!("{}", output.output);
    }
    if output.timed_out {
        eprintln!("sandbox-tty: command timed out after {:?}", output.duration);
        return Ok(EXIT_TIMEOUT);
    }
    Ok(if output.exit_code < 0 { 1 } else { output.exit_code })
}

async fn run_wait(
    mut config: Config,
    endpoint: EndpointArgs,
    attempts: u32,
    interval_ms: Option<u64>,
    command: &[String],
) -> Result<i32> {
    endpoint.apply_size(&mut config);
    let target = endpoint.build(&config)?;
    let executor = CommandExecutor::new(Arc::new(WsConnector::new()), config.exec_options());
    let command = command.join(" ");
    let interval = interval_ms.map_or(POLL_INTERVAL, Duration::from_millis);

    let outcome = poll_until(attempts, interval, |attempt| {
        let executor = executor.clone();
        let target = target.clone();
        let command = command.clone();
        async move {
            match executor.run(&target, &command).await {
                Ok(out) => {
                    log::info!("wait attempt {attempt}: exit {}", out.exit_code);
                    out.success()
                }
                Err(e) if e.kind() == ErrorKind::AuthenticationFailed => {
                    eprintln!("sandbox-tty: {e}");
                    false
                }
                Err(e) => {
                    log::warn!("wait attempt {attempt}: {e}");
                    false
                }
            }
        }
    })
    .await;

    match outcome {
        PollOutcome::Satisfied { attempt } => {
            eprintln!("sandbox-tty: ready after {attempt} attempt(s)");
            Ok(0)
        }
        PollOutcome::Exhausted { attempts } => {
            eprintln!("sandbox-tty: not ready after {attempts} attempt(s)");
            Ok(1)
        }
    }
}

async fn run_attach(mut config: Config, endpoint: EndpointArgs) -> Result<i32> {
    // Size the remote terminal like the local one unless overridden
    if let Ok((cols, rows)) = crossterm::terminal::size() {
        config.columns = cols;
        config.rows = rows;
    }
    endpoint.apply_size(&mut config);
    let target = endpoint.build(&config)?;

    let (controller, mut events) =
        SessionController::new(Arc::new(WsConnector::new()), config.session_options());
    let mut state = controller.subscribe();
    controller.connect(target);

    // Setup terminal only after everything that could fail
    enable_raw_mode()?;
    let _raw_guard = scopeguard::guard((), |()| {
        let _ = disable_raw_mode();
    });

    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut stdout = std::io::stdout();
    let mut resize_tick = tokio::time::interval(RESIZE_POLL);
    let mut local_size = crossterm::terminal::size().ok();
    let mut was_connected = false;

    loop {
        tokio::select! {
            input = stdin_rx.recv() => {
                let Some(bytes) = input else { break };
                if let Some(pos) = bytes.iter().position(|&b| b == DETACH_KEY) {
                    if pos > 0 {
                        controller.send_input(&bytes[..pos]);
                    }
                    break;
                }
                controller.send_input(&bytes);
            }
            event = events.recv() => match event {
                Some(SessionEvent::Output(data)) => {
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
                Some(SessionEvent::Title(title)) => {
                    let _ = execute!(stdout, SetTitle(title));
                }
                Some(SessionEvent::Preferences(prefs)) => {
                    log::debug!("server preferences: {prefs}");
                }
                None => break,
            },
            _ = resize_tick.tick() => {
                let current = crossterm::terminal::size().ok();
                if current != local_size {
                    if let Some((cols, rows)) = current {
                        controller.resize(cols, rows);
                    }
                    local_size = current;
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match current {
                    ConnectionState::Connected => was_connected = true,
                    ConnectionState::Error(e) => {
                        write!(stdout, "\r\n[sandbox-tty] connection lost ({e}), retrying...\r\n")?;
                        stdout.flush()?;
                    }
                    ConnectionState::Disconnected if was_connected => break,
                    ConnectionState::Disconnected | ConnectionState::Connecting => {}
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(0)
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load()?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let code = match cli.command {
        Commands::Exec {
            endpoint,
            timeout_ms,
            keep_ansi,
            cwd,
            command,
        } => runtime.block_on(run_exec(config, endpoint, timeout_ms, keep_ansi, cwd, &command))?,
        Commands::Attach { endpoint } => runtime.block_on(run_attach(config, endpoint))?,
        Commands::Wait {
            endpoint,
            attempts,
            interval_ms,
            command,
        } => runtime.block_on(run_wait(config, endpoint, attempts, interval_ms, &command))?,
        Commands::Config { path } => {
            if path {
                println!("{}", Config::config_path()?.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            0
        }
    };

    // The stdin reader in attach mode blocks; do not wait for it
    runtime.shutdown_timeout(Duration::from_millis(100));
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "sandbox-tty", "exec", "--url", "http://localhost:7681", "--secret", "pw",
            "--arg", "tok", "--timeout-ms", "500", "--", "ls", "-la",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec {
                endpoint,
                timeout_ms,
                command,
                ..
            } => {
                assert_eq!(endpoint.args, vec!["tok".to_string()]);
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(command, vec!["ls".to_string(), "-la".to_string()]);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_endpoint_args_build_url() {
        let args = EndpointArgs {
            url: "http://localhost:7681".into(),
            user: None,
            secret: Some("pw".into()),
            args: vec!["tok".into()],
            session_id: Some("s1".into()),
            cols: Some(100),
            rows: None,
        };
        let endpoint = args.build(&Config::default()).unwrap();
        assert_eq!(
            endpoint.connection_url(),
            "ws://localhost:7681/ws?arg=tok&authorization=dXNlcjpwdw%3D%3D&arg=s1"
        );

        let mut config = Config::default();
        args.apply_size(&mut config);
        assert_eq!((config.columns, config.rows), (100, 24));
    }
}
