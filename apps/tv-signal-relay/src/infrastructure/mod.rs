//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the chart socket client and the service plumbing
//! around the relay core.

/// TradingView chart socket client (framing, handshake, sessions).
pub mod tradingview;

/// Configuration loading.
pub mod config;

/// Signal delivery adapters.
pub mod delivery;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
