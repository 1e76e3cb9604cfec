#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceSocket` against a local WebSocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use buson_api::{DeviceInfo, DeviceSocket, Error, HelloPayload, Outbound, TransportConfig, device_ws_url};

// ── Helpers ─────────────────────────────────────────────────────────

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn hello() -> Outbound {
    Outbound::Hello {
        device: DeviceInfo {
            id: "BUS-1".into(),
            ip: "127.0.0.1".into(),
            device_type: 2,
        },
        payload: HelloPayload {
            bus_number: Some("720".into()),
            vehicle_number: Some("4411".into()),
            direction: "상행".into(),
        },
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_and_receive_frames() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let frame = ws.next().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();

        ws.send(Message::text(json!({ "type": "ack", "ts": 1 }).to_string()))
            .await
            .unwrap();
        value
    });

    let url = device_ws_url("127.0.0.1", port).unwrap();
    let mut socket = DeviceSocket::connect(&url, &TransportConfig::default()).await.unwrap();
    socket.send(&hello()).await.unwrap();

    let text = socket.recv(Duration::from_secs(2)).await.unwrap().unwrap();
    assert!(text.contains("\"ack\""));

    let received = server.await.unwrap();
    assert_eq!(received["type"], "hello");
    assert_eq!(received["device"]["id"], "BUS-1");
    assert_eq!(received["payload"]["vehicle_number"], "4411");
}

#[tokio::test]
async fn test_upgrade_request_carries_path_and_user_agent() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut seen = None;
        let callback = |req: &Request, resp: Response| {
            seen = Some((
                req.uri().path().to_owned(),
                req.headers()
                    .get("user-agent")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
            ));
            Ok(resp)
        };
        let _ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        seen.unwrap()
    });

    let url = device_ws_url("127.0.0.1", port).unwrap();
    let _socket = DeviceSocket::connect(&url, &TransportConfig::default()).await.unwrap();

    let (path, agent) = server.await.unwrap();
    assert_eq!(path, "/device-ws");
    assert_eq!(agent.as_deref(), Some("buson-device"));
}

#[tokio::test]
async fn test_recv_timeout_is_not_an_error() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(ws);
    });

    let url = device_ws_url("127.0.0.1", port).unwrap();
    let mut socket = DeviceSocket::connect(&url, &TransportConfig::default()).await.unwrap();

    let frame = socket.recv(Duration::from_millis(50)).await.unwrap();
    assert!(frame.is_none());

    server.await.unwrap();
}

#[tokio::test]
async fn test_server_close_is_reported() {
    let (listener, port) = listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let url = device_ws_url("127.0.0.1", port).unwrap();
    let mut socket = DeviceSocket::connect(&url, &TransportConfig::default()).await.unwrap();

    let mut failure = None;
    for _ in 0..20 {
        if let Err(e) = socket.recv(Duration::from_millis(100)).await {
            failure = Some(e);
            break;
        }
    }

    assert!(
        matches!(failure, Some(Error::WebSocketClosed { .. })),
        "expected WebSocketClosed, got: {failure:?}"
    );
}

#[tokio::test]
async fn test_connect_refused() {
    let (listener, port) = listener().await;
    drop(listener);

    let url = device_ws_url("127.0.0.1", port).unwrap();
    let result = DeviceSocket::connect(&url, &TransportConfig::default()).await;

    assert!(
        matches!(result, Err(Error::WebSocketConnect(_))),
        "expected WebSocketConnect error, got: {result:?}"
    );
    assert!(result.unwrap_err().is_transient());
}
