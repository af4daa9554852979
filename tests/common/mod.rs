// Fake ttyd server for integration tests.
//
// Speaks the real wire protocol over real TCP WebSockets: negotiates the
// `tty` subprotocol, checks the `authorization` query parameter during the
// upgrade (HTTP 401 on mismatch) and the handshake `AuthToken` (close 1008
// on mismatch), echoes typed input like a pty would, and interprets a tiny
// shell subset so marker-wrapped commands produce real results.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use regex::Regex;
use sandbox_tty::protocol::basic_credential;
use sandbox_tty::SessionEndpoint;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const USER: &str = "user";
pub const SECRET: &str = "s3cret";
pub const HOME: &str = "/home/user";
pub const PROMPT: &str = "\x1b[01;32muser@sandbox\x1b[00m:\x1b[01;34m~\x1b[00m$ ";

/// One frame a client sent after its handshake.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub frame: Vec<u8>,
}

#[derive(Debug)]
struct ServerState {
    credential: String,
    connections: AtomicUsize,
    active: AtomicUsize,
    frames: Mutex<Vec<Received>>,
    kick: broadcast::Sender<()>,
}

/// Handle to a running fake server. Dropping it stops accepting.
#[derive(Debug)]
pub struct FakeTtyd {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeTtyd {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl FakeTtyd {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(ServerState {
            credential: basic_credential(USER, SECRET),
            connections: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            kick,
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(handle_connection(stream, state));
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    /// `http://127.0.0.1:<port>`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Endpoint with the right credentials.
    pub fn endpoint(&self) -> SessionEndpoint {
        SessionEndpoint::from_base(&self.base_url())
            .unwrap()
            .with_credentials(USER, SECRET)
    }

    /// Endpoint whose URL is pre-authorized but whose handshake secret is wrong.
    pub fn endpoint_with_wrong_handshake_secret(&self) -> SessionEndpoint {
        let url = format!(
            "ws://{}/ws?authorization={}",
            self.addr,
            basic_credential(USER, SECRET)
        );
        SessionEndpoint::new(&url)
            .unwrap()
            .with_credentials(USER, "wrong")
    }

    /// Upgrade requests seen so far, successful or not.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections past the handshake and not yet closed.
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Frames received on `connection` after its handshake.
    pub fn frames(&self, connection: usize) -> Vec<Vec<u8>> {
        self.state
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.connection == connection)
            .map(|r| r.frame.clone())
            .collect()
    }

    /// Drop every live connection with close code 1011.
    pub fn kick_all(&self) {
        let _ = self.state.kick.send(());
    }

    /// Poll `check` every 10ms until it holds or `timeout` passes.
    pub async fn wait_until(&self, timeout: Duration, mut check: impl FnMut(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(self)
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let expected = state.credential.clone();

    let callback = move |request: &Request, mut response: Response| {
        let query = request.uri().query().unwrap_or_default();
        let authorized = url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| key == "authorization")
            .all(|(_, value)| value == expected.as_str());
        if !authorized {
            let mut error = ErrorResponse::new(Some("unauthorized".to_string()));
            *error.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(error);
        }
        response
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("tty"));
        Ok(response)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();

    // Handshake: first message is JSON with geometry and AuthToken
    let handshake = match stream.next().await {
        Some(Ok(Message::Binary(data))) => data.to_vec(),
        Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
        _ => return,
    };
    let json: serde_json::Value = serde_json::from_slice(&handshake).unwrap_or_default();
    if json["AuthToken"].as_str() != Some(state.credential.as_str()) {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "authentication failed".into(),
            })))
            .await;
        drain(&mut stream).await;
        return;
    }

    state.active.fetch_add(1, Ordering::SeqCst);
    scopeguard::defer! {
        state.active.fetch_sub(1, Ordering::SeqCst);
    }

    for frame in [
        b"1bash".to_vec(),
        b"2{}".to_vec(),
        b"0Welcome to the fake sandbox\r\n".to_vec(),
        format!("0{PROMPT}").into_bytes(),
    ] {
        if sink.send(Message::Binary(frame)).await.is_err() {
            return;
        }
    }

    let mut kick = state.kick.subscribe();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let mut line = Vec::new();

    loop {
        tokio::select! {
            message = stream.next() => {
                let data = match message {
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                };
                state.frames.lock().unwrap().push(Received {
                    connection,
                    frame: data.clone(),
                });
                if data.first() == Some(&b'0') {
                    for &byte in &data[1..] {
                        if byte == b'\r' {
                            let _ = out_tx.send(b"0\r\n".to_vec());
                            let typed = String::from_utf8_lossy(&line).to_string();
                            line.clear();
                            tokio::spawn(run_line(typed, out_tx.clone()));
                        } else {
                            line.push(byte);
                            let _ = out_tx.send(vec![b'0', byte]);
                        }
                    }
                }
            }
            Some(frame) = out_rx.recv() => {
                if sink.send(Message::Binary(frame)).await.is_err() {
                    return;
                }
            }
            _ = kick.recv() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Error,
                        reason: "kicked".into(),
                    })))
                    .await;
                drain(&mut stream).await;
                return;
            }
        }
    }
}

/// Wait (bounded) for the client to answer our close before dropping TCP.
async fn drain<S>(stream: &mut S)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(Ok(_)) = stream.next().await {}
    })
    .await;
}

/// Interpret one typed line and stream its output back.
async fn run_line(typed: String, out: mpsc::UnboundedSender<Vec<u8>>) {
    let send = |text: &str| {
        let mut frame = vec![b'0'];
        frame.extend_from_slice(text.as_bytes());
        let _ = out.send(frame);
    };

    let wrapped = Regex::new(r#"^\((.*)\); echo "(___TTYD_EXEC_END___[A-Za-z0-9]+):\$\?___"$"#).unwrap();
    let Some(caps) = wrapped.captures(&typed) else {
        let (text, _) = run_chain(&typed).await;
        send(&text);
        send(PROMPT);
        return;
    };

    let (text, code) = run_chain(&caps[1]).await;
    send(&text);
    // Split the marker across frames like a slow pty would
    let marker = format!("{}:{code}___\r\n", &caps[2]);
    let (head, tail) = marker.split_at(marker.len() / 2);
    send(head);
    send(tail);
    send(PROMPT);
}

/// Run `a && b && c` in a subshell starting at $HOME.
async fn run_chain(script: &str) -> (String, i32) {
    let mut cwd = HOME.to_string();
    let mut text = String::new();
    let mut code = 0;
    for command in script.split("&&") {
        let words = split_words(command.trim());
        code = run_command(&words, &mut cwd, &mut text).await;
        if code != 0 {
            break;
        }
    }
    (text, code)
}

async fn run_command(words: &[String], cwd: &mut String, text: &mut String) -> i32 {
    let Some((name, args)) = words.split_first() else {
        return 0;
    };
    match name.as_str() {
        "echo" => {
            text.push_str(&args.join(" "));
            text.push_str("\r\n");
            0
        }
        "printf" => {
            let format = args.first().map(String::as_str).unwrap_or_default();
            text.push_str(&format.replace("\\n", "\r\n"));
            0
        }
        "exit" => args.first().and_then(|c| c.parse().ok()).unwrap_or(0),
        "true" => 0,
        "false" => 1,
        "sleep" => {
            let secs: f64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(0.0);
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            0
        }
        "cd" => {
            *cwd = args.first().cloned().unwrap_or_else(|| HOME.to_string());
            0
        }
        "pwd" => {
            text.push_str(cwd);
            text.push_str("\r\n");
            0
        }
        "ls" => {
            if args.iter().any(|a| a == "--color") {
                text.push_str("\x1b[0m\x1b[01;34mdir\x1b[0m  file.txt\r\n");
            } else {
                text.push_str("dir  file.txt\r\n");
            }
            0
        }
        other => {
            text.push_str(&format!("bash: {other}: command not found\r\n"));
            127
        }
    }
}

/// Minimal POSIX word splitting: whitespace, '...', "...", and backslash.
fn split_words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}
