//! Signal Delivery Adapters
//!
//! `LoggingSink` writes every signal and notice as a structured log line. It
//! is the sink of the standalone binary; embedding applications supply their
//! own [`SignalSink`].

use async_trait::async_trait;

use crate::application::ports::{SessionNotice, SignalSink};
use crate::domain::signal::SignalEvent;
use crate::domain::subscription::SubscriberId;

/// Sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl LoggingSink {
    /// Create a logging sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignalSink for LoggingSink {
    async fn deliver(&self, subscriber: SubscriberId, event: SignalEvent) {
        tracing::info!(
            subscriber,
            kind = event.kind.as_str(),
            price = %event.price,
            timestamp = %event.timestamp.to_rfc3339(),
            "Signal delivered"
        );
    }

    async fn notify(&self, subscriber: SubscriberId, notice: SessionNotice) {
        match notice {
            SessionNotice::Streaming { session_key } => {
                tracing::info!(subscriber, %session_key, "Subscriber streaming");
            }
            SessionNotice::Closed {
                session_key,
                reason,
            } => {
                tracing::info!(subscriber, %session_key, %reason, "Subscriber session closed");
            }
            SessionNotice::Reconnecting { attempt, delay } => {
                tracing::warn!(
                    subscriber,
                    attempt,
                    delay_ms = delay.as_millis(),
                    "Subscriber reconnecting"
                );
            }
            SessionNotice::Failed { error } => {
                tracing::error!(subscriber, %error, "Subscriber stopped");
            }
        }
    }
}
