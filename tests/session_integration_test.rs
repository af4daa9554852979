// Interactive session tests against a fake ttyd over real WebSockets.
//
// Covers resize propagation, input relay, automatic reconnect after an
// abnormal close, and that disconnect/connect toggling never leaves two
// sockets open.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeTtyd;
use sandbox_tty::session::{ClientEvent, ClientOptions, TerminalClient};
use sandbox_tty::{
    ConnectionState, SessionController, SessionEvent, SessionOptions, TerminalSize, WsConnector,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn options() -> SessionOptions {
    SessionOptions {
        reconnect_delay: Duration::from_millis(100),
        ..SessionOptions::default()
    }
}

async fn wait_state(controller: &SessionController, name: &str) -> ConnectionState {
    timeout(WAIT, controller.wait_for(|s| s.name() == name))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {name}, at {}", controller.status()))
        .unwrap()
}

#[tokio::test]
async fn test_scenario_e_resize_sends_single_frame() {
    let server = FakeTtyd::start().await;
    let connector = WsConnector::new();
    let (client, mut events) = TerminalClient::connect(
        &connector,
        &server.endpoint(),
        TerminalSize::new(80, 24),
        ClientOptions::default(),
    )
    .unwrap();

    loop {
        match timeout(WAIT, events.recv()).await.unwrap() {
            Some(ClientEvent::Open) => break,
            Some(ClientEvent::Closed(info)) => panic!("closed early: {info:?}"),
            _ => {}
        }
    }
    assert!(server.wait_until(WAIT, |s| s.active() == 1).await);

    client.resize(120, 40).unwrap();
    assert!(server.wait_until(WAIT, |s| !s.frames(1).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let frames = server.frames(1);
    assert_eq!(frames, vec![br#"1{"columns":120,"rows":40}"#.to_vec()]);
    assert!(!frames.iter().any(|f| f.first() == Some(&b'0')));

    client.shutdown().await;
    assert!(server.wait_until(WAIT, |s| s.active() == 0).await);
}

#[tokio::test]
async fn test_session_relays_input_and_output() {
    let server = FakeTtyd::start().await;
    let (controller, mut events) = SessionController::new(Arc::new(WsConnector::new()), options());
    controller.connect(server.endpoint());
    wait_state(&controller, "connected").await;

    controller.send_text("echo hi\r");

    let mut seen = String::new();
    let found = timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Output(data) = event {
                seen.push_str(&String::from_utf8_lossy(&data));
                if seen.contains("echo hi\r\nhi\r\n") {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "output so far: {seen:?}");

    controller.shutdown().await;
}

#[tokio::test]
async fn test_session_reports_title() {
    let server = FakeTtyd::start().await;
    let (controller, mut events) = SessionController::new(Arc::new(WsConnector::new()), options());
    controller.connect(server.endpoint());

    let title = timeout(WAIT, async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Title(title) = event {
                return Some(title);
            }
        }
        None
    })
    .await
    .unwrap();
    assert_eq!(title.as_deref(), Some("bash"));
    controller.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let server = FakeTtyd::start().await;
    let (controller, _events) = SessionController::new(Arc::new(WsConnector::new()), options());
    controller.connect(server.endpoint());
    wait_state(&controller, "connected").await;
    assert!(server.wait_until(WAIT, |s| s.active() == 1).await);

    server.kick_all();
    wait_state(&controller, "error").await;
    wait_state(&controller, "connected").await;

    assert_eq!(server.connections(), 2);
    assert!(server.wait_until(WAIT, |s| s.active() == 1).await);
    controller.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_suppresses_reconnect() {
    let server = FakeTtyd::start().await;
    let (controller, _events) = SessionController::new(Arc::new(WsConnector::new()), options());
    controller.connect(server.endpoint());
    wait_state(&controller, "connected").await;
    assert!(server.wait_until(WAIT, |s| s.active() == 1).await);

    server.kick_all();
    wait_state(&controller, "error").await;
    controller.disconnect();
    wait_state(&controller, "disconnected").await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.connections(), 1);
    assert_eq!(server.active(), 0);
    assert_eq!(controller.status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_toggling_keeps_one_active_socket() {
    let server = FakeTtyd::start().await;
    let (controller, _events) = SessionController::new(Arc::new(WsConnector::new()), options());

    for round in 1..=3 {
        controller.connect(server.endpoint());
        wait_state(&controller, "connected").await;
        assert!(server.wait_until(WAIT, |s| s.active() == 1).await);
        assert!(server.active() <= 1, "round {round}: two sockets open");

        controller.disconnect();
        wait_state(&controller, "disconnected").await;
        assert!(server.wait_until(WAIT, |s| s.active() == 0).await);
    }

    // Supplying the endpoint twice in a row replaces, never duplicates
    controller.connect(server.endpoint());
    controller.connect(server.endpoint());
    wait_state(&controller, "connected").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.active(), 1);
    assert_eq!(server.connections(), 5);

    controller.shutdown().await;
}
