//! TradingView Signal Relay Binary
//!
//! Runs the relay as a standalone service: seed subscribers from the
//! environment, stream their chart sessions and log every signal.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tv-signal-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TR_VIEW_AUTH_TOKEN`: TradingView auth token
//!
//! ## Optional
//! - `RELAY_SUBSCRIPTIONS`: seed list `id=SYMBOL@TIMEFRAME;...`
//! - `PORT`: health server port (default: 10000)
//! - `TV_WS_URL`, `TV_ORIGIN`, `TV_USER_AGENT`, `TV_ACCEPT_LANGUAGE`: endpoint overrides
//! - `RELAY_HANDSHAKE_TIMEOUT_SECS` (10), `RELAY_IDLE_TIMEOUT_SECS` (60),
//!   `RELAY_SIGNAL_CHANNEL_CAPACITY` (64)
//! - `RELAY_RECONNECT_DELAY_INITIAL_MS` (1000), `RELAY_RECONNECT_DELAY_MAX_SECS` (60),
//!   `RELAY_RECONNECT_DELAY_MULTIPLIER` (2.0), `RELAY_MAX_RECONNECT_ATTEMPTS` (5, 0 = unlimited)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tv_signal_relay::infrastructure::delivery::LoggingSink;
use tv_signal_relay::infrastructure::health::{HealthServer, HealthServerState};
use tv_signal_relay::infrastructure::telemetry;
use tv_signal_relay::{
    ReconnectConfig, RelayConfig, SessionConfig, SubscriptionRegistry, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting TradingView signal relay");

    init_metrics().context("failed to install Prometheus recorder")?;

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(SubscriptionRegistry::new(
        Arc::new(SessionConfig::from_relay_config(&config)),
        ReconnectConfig::from_settings(&config.reconnect),
        Arc::new(LoggingSink::new()),
    ));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    registry.restore(config.subscriptions.clone()).await;
    match registry.start().await {
        Ok(started) => tracing::info!(started, "Signal relay ready"),
        Err(e) => tracing::error!(error = %e, "Subscriber sessions not started"),
    }

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, registry.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Chart sessions did not close in time"
        );
    }

    tracing::info!("Signal relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        auth_token = config.auth_token.is_some(),
        subscribers = config.subscriptions.len(),
        health_port = config.server.health_port,
        max_reconnect_attempts = config.reconnect.max_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        url = %config.tradingview.url,
        handshake_timeout_secs = config.session.handshake_timeout.as_secs(),
        idle_timeout_secs = config.session.idle_timeout.as_secs(),
        "Chart socket endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
