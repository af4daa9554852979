//! WebSocket transport over `tokio-tungstenite`.
//!
//! Thin wrapper providing type-isolated reader/writer halves plus
//! [`WsConnector`], the network implementation of
//! [`crate::transport::Connector`]. This is the only module that names
//! `tokio-tungstenite` types.
//!
//! # Architecture
//!
//! [`connect`] handles URL→request building, header and subprotocol
//! insertion, and TLS negotiation. It returns a ([`WsWriter`], [`WsReader`])
//! pair. [`WsConnector`] spawns one task per socket that owns both halves
//! and bridges them to a [`SocketDriver`] in a `tokio::select!` loop.

// Rust guideline compliant 2026-02

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::error::{CloseInfo, TtyError};
use crate::transport::{Connector, Socket, SocketCommand, SocketDriver};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TtyError> {
        self.sink
            .send(tungstenite::Message::Binary(data))
            .await
            .map_err(|e| TtyError::websocket(format!("WebSocket send failed: {e}")))
    }

    /// Send a close frame with the given code and reason.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<(), TtyError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .map_err(|e| TtyError::websocket(format!("WebSocket close failed: {e}")))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, TtyError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Some(Err(TtyError::websocket(format!("WebSocket read error: {e}"))));
                }
                None => return None,
            }
        }
    }
}

/// Connect to a WebSocket URL with optional headers and subprotocols.
///
/// An HTTP 401/403 during the upgrade is reported as
/// `AUTHENTICATION_FAILED`; every other failure as `CONNECTION_FAILED`.
pub async fn connect(
    url: &str,
    headers: &[(String, String)],
    protocols: &[String],
) -> Result<(WsWriter, WsReader), TtyError> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .map_err(|e| TtyError::connection_failed(format!("invalid WebSocket URL: {e}")))?;

    for (name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TtyError::connection_failed(format!("invalid header name {name}: {e}")))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .map_err(|e| TtyError::connection_failed(format!("invalid header value for {name}: {e}")))?;
        request.headers_mut().insert(header_name, header_value);
    }

    if !protocols.is_empty() {
        let value = tungstenite::http::HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| TtyError::connection_failed(format!("invalid subprotocol list: {e}")))?;
        request
            .headers_mut()
            .insert(tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL, value);
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(classify_connect_error)?;

    let (sink, stream) = ws_stream.split();

    Ok((WsWriter { sink }, WsReader { stream }))
}

fn classify_connect_error(error: tungstenite::Error) -> TtyError {
    if let tungstenite::Error::Http(response) = &error {
        let status = response.status();
        if status == tungstenite::http::StatusCode::UNAUTHORIZED
            || status == tungstenite::http::StatusCode::FORBIDDEN
        {
            return TtyError::authentication_failed(format!(
                "server rejected credentials (HTTP {status})"
            ));
        }
    }
    TtyError::connection_failed(format!("WebSocket connect failed: {error}"))
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Network [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    headers: Vec<(String, String)>,
}

impl WsConnector {
    /// Create a connector with no extra headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header sent with every upgrade request (e.g. `Origin`).
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, protocols: &[&str]) -> Socket {
        let (socket, driver) = Socket::pair();
        let protocols = protocols.iter().map(ToString::to_string).collect();
        tokio::spawn(run_socket(
            url.to_string(),
            self.headers.clone(),
            protocols,
            driver,
        ));
        socket
    }
}

/// Own one WebSocket for its whole life, bridging it to the driver.
async fn run_socket(
    url: String,
    headers: Vec<(String, String)>,
    protocols: Vec<String>,
    mut driver: SocketDriver,
) {
    let (mut writer, mut reader) = match connect(&url, &headers, &protocols).await {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("WebSocket connect failed: {e}");
            driver.error(e);
            driver.closed(CloseInfo::new(CLOSE_ABNORMAL, "connect failed"));
            return;
        }
    };

    driver.opened();

    loop {
        tokio::select! {
            frame = reader.recv() => match frame {
                Some(Ok(WsMessage::Binary(data))) => driver.message(data),
                Some(Ok(WsMessage::Text(text))) => driver.message(text.into_bytes()),
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::debug!("WebSocket closed by server: {code} {reason}");
                    driver.closed(CloseInfo::new(code, reason));
                    return;
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    // Pings are auto-replied by tungstenite; ignore pongs
                }
                Some(Err(e)) => {
                    log::error!("{e}");
                    driver.error(e);
                    driver.closed(CloseInfo::new(CLOSE_ABNORMAL, "read error"));
                    return;
                }
                None => {
                    driver.closed(CloseInfo::new(CLOSE_ABNORMAL, "stream ended"));
                    return;
                }
            },
            command = driver.next_command() => match command {
                Some(SocketCommand::Send(bytes)) => {
                    if let Err(e) = writer.send_binary(bytes).await {
                        log::error!("{e}");
                        driver.error(e);
                        driver.closed(CloseInfo::new(CLOSE_ABNORMAL, "send failed"));
                        return;
                    }
                }
                Some(SocketCommand::Close(info)) => {
                    let _ = writer.send_close(info.code, &info.reason).await;
                    driver.closed(info);
                    return;
                }
                None => {
                    let _ = writer.send_close(CLOSE_NORMAL, "").await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::transport::SocketEvent;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://example.com"),
            "wss://example.com"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:7681"),
            "ws://localhost:7681"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_passthrough() {
        assert_eq!(http_to_ws_scheme("wss://example.com/ws"), "wss://example.com/ws");
        assert_eq!(http_to_ws_scheme("ws://localhost:7681/ws"), "ws://localhost:7681/ws");
    }

    #[test]
    fn test_http_to_ws_scheme_only_rewrites_prefix() {
        assert_eq!(
            http_to_ws_scheme("https://example.com/?next=http://other"),
            "wss://example.com/?next=http://other"
        );
    }

    #[tokio::test]
    async fn test_connect_invalid_url_returns_error() {
        let result = connect("not-a-url", &[], &[]).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_returns_error() {
        let result = connect("ws://127.0.0.1:1/ws", &[], &["tty".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connector_reports_failure_as_events() {
        let mut socket = WsConnector::new().open("ws://127.0.0.1:1/ws", &["tty"]);
        assert!(matches!(socket.next_event().await, Some(SocketEvent::Error(_))));
        assert!(matches!(
            socket.next_event().await,
            Some(SocketEvent::Close(info)) if info.code == CLOSE_ABNORMAL
        ));
    }
}
