//! Shared utilities for integration testing: a relay instance on an
//! ephemeral port, a recording mock target, and a mock manager speaking the
//! control-channel protocol over tokio-tungstenite.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use intercept_proxy::net::Listener;
use intercept_proxy::{ProxyServer, Relay, RelayConfig, Shutdown};

pub type ManagerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_TOKEN: &str = "test-secret";

/// Relay configuration for tests: ephemeral port, short review deadline.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.port = 0;
    config.manager.token = TEST_TOKEN.to_string();
    config.manager.decision_timeout_ms = 800;
    config
}

/// Start a relay on an ephemeral port; returns its address and the shutdown
/// handle keeping it alive.
pub async fn spawn_relay(config: RelayConfig) -> (SocketAddr, Shutdown) {
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Relay::new(config);
    let shutdown = Shutdown::new();
    let accept_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = ProxyServer::new(relay).run(listener, accept_shutdown).await;
    });
    (addr, shutdown)
}

/// Open an authenticated manager channel against a running relay.
pub async fn connect_manager(proxy: SocketAddr, token: &str) -> ManagerSocket {
    let mut request = format!("ws://127.0.0.1:{}/manager", proxy.port())
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-manager-token", token.parse().unwrap());
    let (socket, _) = connect_async(request)
        .await
        .expect("manager upgrade failed");
    socket
}

/// Next JSON control frame from the relay, skipping transport ping/pong.
pub async fn next_frame(socket: &mut ManagerSocket) -> serde_json::Value {
    loop {
        let message = socket
            .next()
            .await
            .expect("manager socket closed")
            .expect("manager transport error");
        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("frame is not valid JSON")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame from relay: {other:?}"),
        }
    }
}

#[allow(dead_code)]
pub async fn send_json(socket: &mut ManagerSocket, value: &serde_json::Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("failed to send frame to relay");
}

/// Drive a manager that accepts every review unchanged.
#[allow(dead_code)]
pub fn accept_all(mut socket: ManagerSocket) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if frame["type"] == "review-request" || frame["type"] == "response-review" {
                    let reply = serde_json::json!({
                        "type": "decision",
                        "id": frame["id"],
                        "action": "accept",
                    });
                    if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// HTTP client routed through the relay.
pub fn proxy_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://127.0.0.1:{}", proxy.port())).unwrap())
        .build()
        .unwrap()
}

/// Start a mock target that records each request head and answers 200 with
/// a fixed body.
pub async fn start_recording_target(
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut head = Vec::new();
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|window| window == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start a raw TCP echo server for direct-splice tunnel tests.
#[allow(dead_code)]
pub async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Read from a raw client socket until the end of an HTTP response head.
#[allow(dead_code)]
pub async fn read_response_head(socket: &mut TcpStream) -> String {
    let mut buf = vec![0u8; 2048];
    let mut head = Vec::new();
    loop {
        let n = socket.read(&mut buf).await.expect("read response head");
        assert!(n > 0, "socket closed before response head completed");
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|window| window == b"\r\n\r\n") {
            return String::from_utf8_lossy(&head).into_owned();
        }
    }
}
