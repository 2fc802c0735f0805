//! Fake chart socket server shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use tv_signal_relay::infrastructure::config::TradingViewSettings;
use tv_signal_relay::{AuthToken, FrameCodec, SessionConfig};

/// Keepalive ping as the server sends it.
pub const KEEPALIVE: &str = "~m~4~m~~h42";

/// Auth token used by every test session.
pub const TEST_TOKEN: &str = "test-token";

/// Session settings pointing at a fake server.
pub fn session_config(url: &str) -> SessionConfig {
    SessionConfig {
        auth_token: Some(AuthToken::new(TEST_TOKEN).unwrap()),
        endpoint: TradingViewSettings {
            url: url.to_string(),
            ..TradingViewSettings::default()
        },
        handshake_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(5),
        channel_capacity: 8,
    }
}

/// A `du` message carrying one study row.
pub fn data_update(session_key: &str, long: f64, short: f64, close: f64) -> Value {
    json!({
        "m": "du",
        "p": [
            session_key,
            {"st7": {"st": [{"i": 299, "v": [1_735_135_200.0, 0.0, 0.0, long, short, close]}]}}
        ]
    })
}

pub struct FakeChartServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl FakeChartServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/socket.io/websocket", self.addr)
    }

    /// Accept a socket without greeting it.
    ///
    /// Clients that go away during the upgrade are skipped.
    pub async fn accept_silent(&self) -> WebSocketStream<TcpStream> {
        loop {
            let (stream, _) = self.listener.accept().await.unwrap();
            if let Ok(ws) = accept_async(stream).await {
                return ws;
            }
        }
    }

    /// Accept a socket and play the server side of the handshake.
    ///
    /// Clients that go away before the handshake completes are skipped.
    pub async fn accept(&self) -> ChartPeer {
        loop {
            let ws = self.accept_silent().await;
            if let Some(peer) = handshake(ws).await {
                return peer;
            }
        }
    }
}

async fn handshake(mut ws: WebSocketStream<TcpStream>) -> Option<ChartPeer> {
    ws.send(Message::text(FrameCodec::wrap(
        r#"{"session_id":"<0.1.2>_fake","timestamp":1735135200,"protocol":"json"}"#,
    )))
    .await
    .ok()?;

    let codec = FrameCodec::new();
    let mut handshake = Vec::new();
    while handshake.len() < 5 {
        let text = next_text(&mut ws).await?;
        handshake.extend(codec.decode(&text).into_iter().filter_map(Result::ok));
    }

    let session_key = handshake[1]["p"][0].as_str()?.to_string();
    let ack = json!({"m": "symbol_resolved", "p": [session_key, "sds_sym_1", {}]});
    ws.send(Message::text(FrameCodec::wrap(&ack.to_string())))
        .await
        .ok()?;

    Some(ChartPeer {
        ws,
        session_key,
        handshake,
    })
}

/// Server side of one handshaken chart session.
pub struct ChartPeer {
    pub ws: WebSocketStream<TcpStream>,
    pub session_key: String,
    pub handshake: Vec<Value>,
}

impl ChartPeer {
    pub fn methods(&self) -> Vec<&str> {
        self.handshake
            .iter()
            .filter_map(|message| message["m"].as_str())
            .collect()
    }

    pub async fn send_raw(&mut self, chunk: impl Into<String>) {
        self.ws.send(Message::text(chunk.into())).await.unwrap();
    }

    pub async fn send_update(&mut self, long: f64, short: f64, close: f64) {
        let frame = FrameCodec::wrap(&data_update(&self.session_key, long, short, close).to_string());
        self.send_raw(frame).await;
    }

    pub async fn next_text(&mut self) -> Option<String> {
        timeout(Duration::from_secs(5), next_text(&mut self.ws))
            .await
            .ok()
            .flatten()
    }

    /// Drain the socket until the client goes away.
    pub async fn closed(&mut self) {
        let _ = timeout(Duration::from_secs(10), async {
            while next_text(&mut self.ws).await.is_some() {}
        })
        .await;
    }
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}
