//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Sessions**: chart sessions opened, closed and currently streaming
//! - **Frames**: keepalives echoed and frames that failed to decode
//! - **Signals**: Long/Short events emitted and delivered
//! - **Latency**: connect-to-streaming handshake duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::signal::SignalKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all relay metrics.
///
/// Calling this again returns the already installed handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Session lifecycle
    describe_counter!(
        "signal_relay_sessions_opened_total",
        "Chart sessions that completed the handshake"
    );
    describe_counter!(
        "signal_relay_sessions_closed_total",
        "Chart sessions closed, by reason"
    );
    describe_gauge!(
        "signal_relay_sessions_streaming",
        "Chart sessions currently streaming"
    );
    describe_counter!(
        "signal_relay_session_failures_total",
        "Session attempts that failed before streaming, by stage"
    );
    describe_counter!(
        "signal_relay_reconnects_total",
        "Reconnect attempts scheduled by subscriber supervisors"
    );

    // Frames
    describe_counter!(
        "signal_relay_keepalives_total",
        "Keepalive pings echoed back"
    );
    describe_counter!(
        "signal_relay_frame_errors_total",
        "Frames that failed to decode"
    );

    // Signals
    describe_counter!(
        "signal_relay_signals_emitted_total",
        "Signals emitted by extractors, by kind"
    );
    describe_counter!(
        "signal_relay_signals_delivered_total",
        "Signals handed to the delivery sink"
    );

    // Latency
    describe_histogram!(
        "signal_relay_handshake_seconds",
        "Time from connect to streaming"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Stage at which a session attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Socket could not be opened.
    Connect,
    /// Bootstrap exchange failed.
    Handshake,
    /// Settings were rejected before connecting.
    Configuration,
}

impl FailureStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Configuration => "configuration",
        }
    }
}

/// Record a session that reached streaming.
pub fn record_session_opened(handshake: Duration) {
    counter!("signal_relay_sessions_opened_total").increment(1);
    gauge!("signal_relay_sessions_streaming").increment(1.0);
    histogram!("signal_relay_handshake_seconds").record(handshake.as_secs_f64());
}

/// Record a streaming session that closed.
pub fn record_session_closed(reason: &'static str) {
    counter!("signal_relay_sessions_closed_total", "reason" => reason).increment(1);
    gauge!("signal_relay_sessions_streaming").decrement(1.0);
}

/// Record a session attempt that failed before streaming.
pub fn record_session_failure(stage: FailureStage) {
    counter!("signal_relay_session_failures_total", "stage" => stage.as_str()).increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("signal_relay_reconnects_total").increment(1);
}

/// Record an echoed keepalive.
pub fn record_keepalive() {
    counter!("signal_relay_keepalives_total").increment(1);
}

/// Record frames that failed to decode.
pub fn record_frame_errors(count: u64) {
    counter!("signal_relay_frame_errors_total").increment(count);
}

/// Record an emitted signal.
pub fn record_signal_emitted(kind: SignalKind) {
    counter!("signal_relay_signals_emitted_total", "kind" => kind.as_str()).increment(1);
}

/// Record a signal handed to the sink.
pub fn record_signal_delivered() {
    counter!("signal_relay_signals_delivered_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_stage_labels() {
        assert_eq!(FailureStage::Connect.as_str(), "connect");
        assert_eq!(FailureStage::Handshake.as_str(), "handshake");
        assert_eq!(FailureStage::Configuration.as_str(), "configuration");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_session_failure(FailureStage::Connect);
        record_signal_emitted(SignalKind::Long);
        record_frame_errors(3);
    }
}
