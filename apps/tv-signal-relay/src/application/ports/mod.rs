//! Port Interfaces
//!
//! Contracts between the relay core and the application embedding it.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SignalSink`: receives each subscriber's signals and session notices

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::signal::SignalEvent;
use crate::domain::subscription::SubscriberId;

/// Lifecycle notifications about a subscriber's chart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A session completed its handshake and is streaming.
    Streaming {
        /// Chart session key.
        session_key: String,
    },
    /// A streaming session ended.
    Closed {
        /// Chart session key.
        session_key: String,
        /// Close reason.
        reason: String,
    },
    /// The next attempt is scheduled after a failure.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Streaming stopped for good for this subscriber.
    Failed {
        /// Final error.
        error: String,
    },
}

/// Delivery callback supplied by the embedding application.
///
/// Delivery is best-effort: implementations handle their own failures.
///
/// # Re-entrancy
///
/// Calls run on the subscriber's supervisor task. While a subscriber's
/// session is being replaced or removed, that task is awaited under the
/// subscriber's change lock, so an implementation must not call
/// `set_symbol_and_timeframe` or `remove_subscriber` for the same subscriber
/// from inside `deliver` or `notify`; doing so deadlocks. Read accessors
/// (`subscriber`, `subscribers`, `active_sessions`, `len`) are safe to call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Deliver a signal for a subscriber.
    async fn deliver(&self, subscriber: SubscriberId, event: SignalEvent);

    /// Report a session lifecycle change for a subscriber.
    async fn notify(&self, subscriber: SubscriberId, notice: SessionNotice);
}

/// Everything a [`RecordingSink`] has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// A delivered signal.
    Signal(SubscriberId, SignalEvent),
    /// A notice.
    Notice(SubscriberId, SessionNotice),
}

/// In-memory sink for testing.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<Recorded>>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<Recorded> {
        self.entries.lock().clone()
    }

    /// Signals delivered to one subscriber.
    #[must_use]
    pub fn signals_for(&self, subscriber: SubscriberId) -> Vec<SignalEvent> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Signal(id, event) if *id == subscriber => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Notices sent for one subscriber.
    #[must_use]
    pub fn notices_for(&self, subscriber: SubscriberId) -> Vec<SessionNotice> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Notice(id, notice) if *id == subscriber => Some(notice.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn deliver(&self, subscriber: SubscriberId, event: SignalEvent) {
        self.entries.lock().push(Recorded::Signal(subscriber, event));
    }

    async fn notify(&self, subscriber: SubscriberId, notice: SessionNotice) {
        self.entries.lock().push(Recorded::Notice(subscriber, notice));
    }
}
