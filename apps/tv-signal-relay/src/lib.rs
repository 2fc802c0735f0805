#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! TradingView Signal Relay
//!
//! Streams a published indicator from TradingView's chart websocket, turns
//! its plot markers into debounced Long/Short signals and relays them, one
//! independent chart session per subscriber.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and the signal state machine
//!   - `signal`: timeframes, indicator samples, `SignalExtractor`
//!   - `subscription`: subscriber ids and stream settings
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `SignalSink` delivery callback
//!   - `services`: `SubscriptionRegistry`
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tradingview`: framing, handshake, parser, sessions, reconnect policy
//!   - `config`: environment configuration
//!   - `delivery`: logging sink for the standalone binary
//!   - `health`: health check HTTP endpoint
//!   - `metrics`, `telemetry`: observability
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────────────── per subscriber ─────────────────────────┐
//! set_symbol_and_   ──►  │ supervisor ──► session ──► codec ──► parser ──► SignalExtractor │ ──► SignalSink
//! timeframe(id, ..)      │     ▲              │                                             │
//!                        │     └─ backoff ◄───┘ transport error                             │
//!                        └─────────────────────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Signal types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::error::ConfigurationError;
pub use domain::signal::{
    ExtractorState, IndicatorSample, SignalEvent, SignalExtractor, SignalKind, Timeframe,
};
pub use domain::subscription::{StreamSettings, SubscriberId, SubscriberRecord, Symbol};

// Application
pub use application::ports::{RecordingSink, SessionNotice, SignalSink};
pub use application::services::{RegistryError, SubscriptionRegistry};

// Chart socket client
pub use infrastructure::tradingview::{
    AuthToken, CloseReason, FrameCodec, HandshakeBuilder, HandshakeSpec, ReconnectConfig,
    ReconnectPolicy, SessionConfig, SessionConnection, SessionError, SessionHandle, SessionKey,
    SessionState, StreamParser, TransportError,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
