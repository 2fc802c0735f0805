//! Chart Session Integration Tests
//!
//! Runs real sessions against a local websocket server speaking the chart
//! protocol: handshake order, keepalive echo, signal extraction and close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use tv_signal_relay::{
    CloseReason, FrameCodec, HandshakeSpec, SessionConnection, SessionError, SessionState,
    SignalKind, StreamSettings, TransportError,
};

use common::{FakeChartServer, KEEPALIVE, TEST_TOKEN, data_update, session_config};

fn btc_15m() -> HandshakeSpec {
    StreamSettings::parse("BINANCE:BTCUSDT", "15").unwrap().into()
}

#[tokio::test]
async fn streams_signals_and_echoes_keepalives() {
    let server = FakeChartServer::bind().await;
    let url = server.url();

    let server_task = tokio::spawn(async move {
        let mut peer = server.accept().await;
        assert_eq!(
            peer.methods(),
            [
                "set_auth_token",
                "chart_create_session",
                "resolve_symbol",
                "create_series",
                "create_study"
            ]
        );
        assert_eq!(peer.handshake[0]["p"][0], TEST_TOKEN);
        assert_eq!(peer.handshake[3]["p"][4], "15");

        peer.send_raw(KEEPALIVE).await;
        assert_eq!(peer.next_text().await.as_deref(), Some(KEEPALIVE));

        // A malformed frame and a foreign session's update ride along with ours.
        let chunk = format!(
            "{}{}{}",
            FrameCodec::wrap("{not json"),
            FrameCodec::wrap(&data_update("cs_000000000000", 0.0, 300.0, 1.0).to_string()),
            FrameCodec::wrap(&data_update(&peer.session_key, 0.0, 300.0, 97_250.5).to_string()),
        );
        peer.send_raw(chunk).await;

        // Inside the 15 minute window.
        peer.send_update(200.0, 0.0, 97_300.0).await;

        peer.closed().await;
        peer.session_key
    });

    let connection = SessionConnection::new(Arc::new(session_config(&url)), btc_15m());
    let session_key = connection.session_key().to_string();

    let mut handle = timeout(Duration::from_secs(5), connection.open())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.state(), SessionState::Streaming);

    let mut signals = handle.take_signals().unwrap();
    assert!(handle.take_signals().is_none());

    let event = timeout(Duration::from_secs(5), signals.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, SignalKind::Short);
    assert_eq!(event.price, Decimal::new(972_505, 1));

    assert!(
        timeout(Duration::from_millis(300), signals.next())
            .await
            .is_err()
    );

    let state = handle.watch_state();
    assert_eq!(handle.close().await, CloseReason::Requested);
    assert_eq!(*state.borrow(), SessionState::Closed);

    assert_eq!(server_task.await.unwrap(), session_key);
}

#[tokio::test]
async fn server_close_ends_the_signal_stream() {
    let server = FakeChartServer::bind().await;
    let url = server.url();

    let server_task = tokio::spawn(async move {
        let mut peer = server.accept().await;
        peer.ws.close(None).await.unwrap();
        peer.closed().await;
    });

    let mut handle = SessionConnection::new(Arc::new(session_config(&url)), btc_15m())
        .open()
        .await
        .unwrap();
    let mut signals = handle.take_signals().unwrap();
    let state = handle.watch_state();

    let end = timeout(Duration::from_secs(5), signals.next()).await.unwrap();
    assert!(end.is_none());
    assert!(matches!(handle.close().await, CloseReason::Lost(_)));
    assert_eq!(*state.borrow(), SessionState::Closed);

    server_task.await.unwrap();
}

#[tokio::test]
async fn silent_server_times_out_the_handshake() {
    let server = FakeChartServer::bind().await;
    let mut config = session_config(&server.url());
    config.handshake_timeout = Duration::from_millis(200);

    let server_task = tokio::spawn(async move {
        let mut ws = server.accept_silent().await;
        let _ = timeout(Duration::from_secs(5), futures_util::StreamExt::next(&mut ws)).await;
    });

    let connection = SessionConnection::new(Arc::new(config), btc_15m());
    let state = connection.watch_state();

    let err = connection.open().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::HandshakeTimeout {
            phase: "greeting",
            ..
        })
    ));
    assert_eq!(*state.borrow(), SessionState::Closed);

    server_task.await.unwrap();
}

#[tokio::test]
async fn idle_socket_is_reported_lost() {
    let server = FakeChartServer::bind().await;
    let mut config = session_config(&server.url());
    config.idle_timeout = Duration::from_millis(300);

    let server_task = tokio::spawn(async move {
        let mut peer = server.accept().await;
        peer.closed().await;
    });

    let mut handle = SessionConnection::new(Arc::new(config), btc_15m())
        .open()
        .await
        .unwrap();
    let mut signals = handle.take_signals().unwrap();

    assert!(
        timeout(Duration::from_secs(5), signals.next())
            .await
            .unwrap()
            .is_none()
    );
    match handle.close().await {
        CloseReason::Lost(reason) => assert!(reason.contains("no traffic")),
        CloseReason::Requested => panic!("idle session closed as requested"),
    }

    server_task.await.unwrap();
}
